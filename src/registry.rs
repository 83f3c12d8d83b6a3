//! Per-session component registry: fragment id to mounted instance

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::fragment::{Fragment, FragmentConfig, FragmentId};
use crate::render::RenderPhase;

/// A fragment instance mounted in one session
#[derive(Clone)]
pub struct MountedFragment {
    pub id: FragmentId,
    pub config: Arc<FragmentConfig>,
    pub fragment: Arc<dyn Fragment>,
    /// Latest transition of any in-flight render
    pub phase: RenderPhase,
    /// Renders of this id currently running
    pub in_flight: usize,
    pub mounted_at: DateTime<Utc>,
}

impl std::fmt::Debug for MountedFragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountedFragment")
            .field("id", &self.id)
            .field("kind", &self.config.kind())
            .field("phase", &self.phase)
            .field("in_flight", &self.in_flight)
            .field("mounted_at", &self.mounted_at)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct ComponentRegistry {
    entries: HashMap<FragmentId, MountedFragment>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Last writer wins; the replaced entry is returned.
    pub fn insert(
        &mut self,
        id: FragmentId,
        config: Arc<FragmentConfig>,
        fragment: Arc<dyn Fragment>,
    ) -> Option<MountedFragment> {
        let entry = MountedFragment {
            id: id.clone(),
            config,
            fragment,
            phase: RenderPhase::Idle,
            in_flight: 0,
            mounted_at: Utc::now(),
        };
        self.entries.insert(id, entry)
    }

    pub fn get(&self, id: &str) -> Option<&MountedFragment> {
        self.entries.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<MountedFragment> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns false if the id is not mounted
    pub fn set_phase(&mut self, id: &str, phase: RenderPhase) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.phase = phase;
                true
            }
            None => false,
        }
    }

    /// Count a render of `id` as started and move it to `Loading`
    pub fn begin_render(&mut self, id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.in_flight += 1;
                entry.phase = RenderPhase::Loading;
                true
            }
            None => false,
        }
    }

    /// Count one render of `id` as finished. The phase goes back to `Idle`
    /// only when no other render of the id is still running.
    pub fn finish_render(&mut self, id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.in_flight = entry.in_flight.saturating_sub(1);
                if entry.in_flight == 0 {
                    entry.phase = RenderPhase::Idle;
                }
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<FragmentId> {
        let mut ids: Vec<_> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop every derived-id entry not in `keep`. Explicit ids always stay.
    pub fn prune_derived(&mut self, keep: &HashSet<FragmentId>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|id, _| !id.is_derived() || keep.contains(id));
        before - self.entries.len()
    }
}
