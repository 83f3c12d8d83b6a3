//! A live session: optional state, component registry and notification
//! channel, keyed by an opaque token carried in a cookie.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

use crate::channel::NotificationChannel;
use crate::error::{ConfigurationError, RenderableError, Result};
use crate::fragment::{Fragment, FragmentConfig, FragmentId};
use crate::registry::{ComponentRegistry, MountedFragment};
use crate::render::RenderPhase;
use crate::state::{State, StateSchema};

/// Opaque, unguessable session token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// 32 random bytes, URL-safe base64 without padding
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes[..]);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

pub struct Session {
    token: SessionToken,
    state: Option<State>,
    registry: Mutex<ComponentRegistry>,
    channel: NotificationChannel,
    created_at: DateTime<Utc>,
    last_seen: Mutex<Instant>,
    evicted: watch::Sender<bool>,
    open_streams: AtomicUsize,
}

impl Session {
    /// New session with a fresh token. The state, if any, is bound to this
    /// session's channel.
    pub fn new(state: Option<State>) -> Self {
        Self::with_token(SessionToken::generate(), state)
    }

    pub fn with_token(token: SessionToken, state: Option<State>) -> Self {
        let channel = NotificationChannel::new();
        if let Some(state) = &state {
            state.bind(&channel.notifier());
        }
        let (evicted, _) = watch::channel(false);
        Self {
            token,
            state,
            registry: Mutex::new(ComponentRegistry::new()),
            channel,
            created_at: Utc::now(),
            last_seen: Mutex::new(Instant::now()),
            evicted,
            open_streams: AtomicUsize::new(0),
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn state(&self) -> Option<&State> {
        self.state.as_ref()
    }

    /// Typed access to the session's state schema
    pub fn state_as<S: StateSchema>(&self) -> Option<Arc<S>> {
        self.state.as_ref().and_then(State::downcast::<S>)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn registry(&self) -> MutexGuard<'_, ComponentRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Register a fragment under `id`, replacing any previous instance.
    /// Returns the replaced fragment.
    pub fn add_component(
        &self,
        id: FragmentId,
        config: Arc<FragmentConfig>,
        fragment: Arc<dyn Fragment>,
    ) -> Option<Arc<dyn Fragment>> {
        self.registry()
            .insert(id, config, fragment)
            .map(|previous| previous.fragment)
    }

    /// The exact instance registered under `id`
    pub fn get_component(&self, id: &str) -> Result<Arc<dyn Fragment>> {
        self.resolve(id).map(|mounted| mounted.fragment)
    }

    pub fn resolve(&self, id: &str) -> Result<MountedFragment> {
        if self.is_evicted() {
            return Err(RenderableError::fragment_not_found(id));
        }
        self.registry()
            .get(id)
            .cloned()
            .ok_or_else(|| RenderableError::fragment_not_found(id))
    }

    pub fn set_phase(&self, id: &str, phase: RenderPhase) -> bool {
        self.registry().set_phase(id, phase)
    }

    pub fn phase(&self, id: &str) -> Option<RenderPhase> {
        self.registry().get(id).map(|mounted| mounted.phase)
    }

    pub(crate) fn begin_render(&self, id: &str) -> bool {
        self.registry().begin_render(id)
    }

    pub(crate) fn finish_render(&self, id: &str) -> bool {
        self.registry().finish_render(id)
    }

    /// Renders of `id` currently running
    pub fn renders_in_flight(&self, id: &str) -> Option<usize> {
        self.registry().get(id).map(|mounted| mounted.in_flight)
    }

    pub fn component_count(&self) -> usize {
        self.registry().len()
    }

    pub fn component_ids(&self) -> Vec<FragmentId> {
        self.registry().ids()
    }

    pub fn prune_derived(&self, keep: &HashSet<FragmentId>) -> usize {
        let pruned = self.registry().prune_derived(keep);
        if pruned > 0 {
            debug!(session = %self.token, pruned, "pruned derived fragments");
        }
        pruned
    }

    /// Mount a fragment instance: assign its id, register it, and subscribe
    /// it to the state fields its kind reloads on.
    pub fn mount(
        &self,
        config: Arc<FragmentConfig>,
        fragment: Arc<dyn Fragment>,
    ) -> Result<FragmentId> {
        let id = config
            .explicit_id()
            .cloned()
            .unwrap_or_else(FragmentId::derived);

        let mut fields = Vec::with_capacity(config.reload_on().len());
        if !config.reload_on().is_empty() {
            let state = self.state.as_ref().ok_or_else(|| {
                ConfigurationError::ReloadWithoutSchema {
                    kind: config.kind().to_string(),
                }
            })?;
            for name in config.reload_on() {
                let field = state.field(name).ok_or_else(|| ConfigurationError::UnknownField {
                    kind: config.kind().to_string(),
                    field: name.to_string(),
                })?;
                fields.push(field);
            }
        }

        let kind = config.kind();
        if self.add_component(id.clone(), config, fragment).is_some() {
            debug!(session = %self.token, fragment = %id, kind, "replaced mounted fragment");
        }
        for field in fields {
            field.register(id.clone());
        }
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Schedule a reload of `id`. Repeats are not coalesced.
    pub fn enqueue(&self, id: FragmentId) -> bool {
        self.channel.push(id)
    }

    /// Next fragment id to push to the client. Waits while the channel is
    /// empty.
    pub async fn get_updated_component_id(&self) -> Option<FragmentId> {
        self.channel.next().await
    }

    /// Queued ids, or `None` while a push dispatcher is waiting on the
    /// channel
    pub fn drain_notifications(&self) -> Option<Vec<FragmentId>> {
        self.channel.drain()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn is_evicted(&self) -> bool {
        *self.evicted.borrow()
    }

    pub(crate) fn mark_evicted(&self) {
        self.evicted.send_replace(true);
    }

    /// Resolves once the session has been removed from its store
    pub async fn wait_evicted(&self) {
        let mut rx = self.evicted.subscribe();
        let _ = rx.wait_for(|evicted| *evicted).await;
    }

    pub(crate) fn stream_opened(&self) -> usize {
        self.open_streams.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn stream_closed(&self) -> usize {
        self.open_streams.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token)
            .field("state", &self.state)
            .field("components", &self.component_count())
            .field("created_at", &self.created_at)
            .field("evicted", &self.is_evicted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::render::RenderContext;
    use crate::state::{ObservableField, StateField};
    use async_trait::async_trait;

    struct Counter {
        count: StateField<i64>,
    }

    impl StateSchema for Counter {
        fn fields(&self) -> Vec<&dyn ObservableField> {
            vec![&self.count as &dyn ObservableField]
        }
    }

    fn counter_state() -> State {
        State::new(Counter {
            count: StateField::new("count", 0),
        })
    }

    struct Display;

    #[async_trait]
    impl Fragment for Display {
        fn kind(&self) -> &'static str {
            "Display"
        }

        async fn render(&self, ctx: &mut RenderContext) -> anyhow::Result<()> {
            ctx.write("display");
            Ok(())
        }
    }

    fn display_config(id: Option<&str>, reload_on: &[&'static str]) -> Arc<FragmentConfig> {
        let mut builder = FragmentConfig::builder("Display").reload_on(reload_on.iter().copied());
        if let Some(id) = id {
            builder = builder.id(id);
        }
        Arc::new(
            builder
                .build(&RouterConfig::default(), Some(&["count", "other"][..]))
                .unwrap(),
        )
    }

    #[test]
    fn test_tokens_are_distinct() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 43);
        assert!(a
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_get_component_returns_same_instance() {
        let session = Session::new(None);
        let fragment: Arc<dyn Fragment> = Arc::new(Display);
        session.add_component(FragmentId::new("d"), display_config(None, &[]), fragment.clone());

        let found = session.get_component("d").unwrap();
        assert!(Arc::ptr_eq(&found, &fragment));
        assert!(matches!(
            session.get_component("missing"),
            Err(RenderableError::FragmentNotFound { .. })
        ));
    }

    #[test]
    fn test_add_component_replaces() {
        let session = Session::new(None);
        let first: Arc<dyn Fragment> = Arc::new(Display);
        let second: Arc<dyn Fragment> = Arc::new(Display);
        session.add_component(FragmentId::new("d"), display_config(None, &[]), first.clone());
        let replaced = session
            .add_component(FragmentId::new("d"), display_config(None, &[]), second.clone())
            .unwrap();

        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&session.get_component("d").unwrap(), &second));
        assert_eq!(session.component_count(), 1);
    }

    #[test]
    fn test_mount_explicit_id_registers_on_fields() {
        let session = Session::new(Some(counter_state()));
        let id = session
            .mount(display_config(Some("display"), &["count"]), Arc::new(Display))
            .unwrap();
        assert_eq!(id.as_str(), "display");

        // Remounting keeps a single subscription
        session
            .mount(display_config(Some("display"), &["count"]), Arc::new(Display))
            .unwrap();

        let counter = session.state_as::<Counter>().unwrap();
        assert_eq!(counter.count.subscribers(), vec![FragmentId::new("display")]);
        assert_eq!(counter.count.set(1), 1);
        assert_eq!(session.drain_notifications().unwrap(), vec![FragmentId::new("display")]);
    }

    #[test]
    fn test_mount_derived_ids() {
        let session = Session::new(None);
        let a = session.mount(display_config(None, &[]), Arc::new(Display)).unwrap();
        let b = session.mount(display_config(None, &[]), Arc::new(Display)).unwrap();
        assert_ne!(a, b);
        assert!(a.is_derived());
        assert_eq!(session.component_count(), 2);
    }

    #[test]
    fn test_mount_without_state_fails() {
        let session = Session::new(None);
        let err = session
            .mount(display_config(Some("display"), &["count"]), Arc::new(Display))
            .unwrap_err();
        assert!(matches!(
            err,
            RenderableError::Configuration(ConfigurationError::ReloadWithoutSchema { .. })
        ));
        assert_eq!(session.component_count(), 0);
    }

    #[test]
    fn test_mount_unknown_field_fails() {
        let session = Session::new(Some(counter_state()));
        let err = session
            .mount(display_config(Some("display"), &["other"]), Arc::new(Display))
            .unwrap_err();
        assert!(matches!(
            err,
            RenderableError::Configuration(ConfigurationError::UnknownField { .. })
        ));
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let session = Session::new(None);
        session.enqueue(FragmentId::new("a"));
        session.enqueue(FragmentId::new("b"));
        session.enqueue(FragmentId::new("a"));

        assert_eq!(session.get_updated_component_id().await, Some(FragmentId::new("a")));
        assert_eq!(session.get_updated_component_id().await, Some(FragmentId::new("b")));
        assert_eq!(session.get_updated_component_id().await, Some(FragmentId::new("a")));
    }

    #[tokio::test]
    async fn test_evicted_session_resolves_nothing() {
        let session = Arc::new(Session::new(None));
        session.add_component(FragmentId::new("d"), display_config(None, &[]), Arc::new(Display));

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_evicted().await })
        };
        session.mark_evicted();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("eviction not observed")
            .unwrap();
        assert!(session.is_evicted());
        assert!(session.resolve("d").is_err());
    }

    #[test]
    fn test_stream_counting() {
        let session = Session::new(None);
        assert_eq!(session.stream_opened(), 1);
        assert_eq!(session.stream_opened(), 2);
        assert_eq!(session.stream_closed(), 1);
        assert_eq!(session.open_streams(), 1);
    }
}
