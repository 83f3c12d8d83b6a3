//! Process-wide session store
//!
//! Shared map of token to session. Every session gets a fresh state
//! instance from the configured factory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{RenderableError, Result};
use crate::session::{Session, SessionToken};
use crate::state::State;

/// Builds a fresh state for each new session
pub type SchemaFactory = Arc<dyn Fn() -> State + Send + Sync>;

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionToken, Arc<Session>>>>,
    schema: Option<SchemaFactory>,
}

impl SessionStore {
    /// Store without session state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema<F>(factory: F) -> Self
    where
        F: Fn() -> State + Send + Sync + 'static,
    {
        Self {
            sessions: Arc::default(),
            schema: Some(Arc::new(factory)),
        }
    }

    pub fn has_schema(&self) -> bool {
        self.schema.is_some()
    }

    /// Create and register a session with a fresh token
    pub async fn create_session(&self) -> Arc<Session> {
        let state = self.schema.as_ref().map(|factory| factory());
        let session = Arc::new(Session::new(state));
        self.sessions
            .write()
            .await
            .insert(session.token().clone(), session.clone());
        info!(session = %session.token(), "created session");
        session
    }

    pub async fn get_session(&self, token: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| RenderableError::SessionNotFound {
                token: token.to_string(),
            })
    }

    /// Look up the presented token, creating a new session when it is
    /// missing or unknown. The flag is true for a new session.
    pub async fn get_or_create(&self, token: Option<&str>) -> (Arc<Session>, bool) {
        if let Some(token) = token {
            match self.get_session(token).await {
                Ok(session) => {
                    session.touch();
                    return (session, false);
                }
                Err(e) => debug!("{}, issuing a new session", e),
            }
        }
        (self.create_session().await, true)
    }

    /// Remove a session and signal its eviction. Returns false if it was
    /// already gone.
    pub async fn remove_session(&self, token: &str) -> bool {
        let removed = self.sessions.write().await.remove(token);
        match removed {
            Some(session) => {
                session.mark_evicted();
                info!(
                    session = %session.token(),
                    components = session.component_count(),
                    "evicted session"
                );
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, token: &str) -> bool {
        self.sessions.read().await.contains_key(token)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Evict sessions idle for at least `max_idle`. Sessions with an open
    /// stream are never idle.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<SessionToken> {
        let stale: Vec<SessionToken> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.open_streams() == 0 && s.idle_for() >= max_idle)
                .map(|s| s.token().clone())
                .collect()
        };

        let mut evicted = Vec::with_capacity(stale.len());
        for token in stale {
            if self.remove_session(token.as_str()).await {
                evicted.push(token);
            }
        }
        evicted
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("has_schema", &self.has_schema())
            .finish_non_exhaustive()
    }
}
