//! Request context and the fragment render cycle
//!
//! Every render gets its own [`RenderContext`]: the session, the id being
//! rendered, an output buffer and a snapshot of the request's form inputs.
//! Nothing is shared between concurrent renders. The id being rendered is
//! also published in a task-local so that state writes made by a fragment
//! do not schedule a reload of that same fragment.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{RenderableError, Result};
use crate::fragment::{Fragment, FragmentCatalog, FragmentId};
use crate::markup;
use crate::session::Session;
use crate::state::StateSchema;

tokio::task_local! {
    static RENDERING: FragmentId;
}

/// Id of the fragment whose render is running on the current task, if any
pub fn current_rendering() -> Option<FragmentId> {
    RENDERING.try_with(|id| id.clone()).ok()
}

/// Where a mounted fragment is in its render cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderPhase {
    #[default]
    Idle,
    Loading,
    Rendering,
    Emitted,
    Failed,
}

/// Parsed form inputs of one request
pub type FormInputs = HashMap<String, String>;

pub struct RenderContext {
    session: Arc<Session>,
    catalog: Arc<FragmentCatalog>,
    fragment_id: Option<FragmentId>,
    buffer: String,
    inputs: FormInputs,
    mounted: Vec<FragmentId>,
}

impl RenderContext {
    /// Context for rendering outside any mounted fragment, e.g. a page root
    pub fn new(session: Arc<Session>, catalog: Arc<FragmentCatalog>) -> Self {
        Self {
            session,
            catalog,
            fragment_id: None,
            buffer: String::new(),
            inputs: FormInputs::new(),
            mounted: Vec::new(),
        }
    }

    pub fn for_fragment(
        session: Arc<Session>,
        catalog: Arc<FragmentCatalog>,
        fragment_id: FragmentId,
    ) -> Self {
        Self {
            fragment_id: Some(fragment_id),
            ..Self::new(session, catalog)
        }
    }

    pub fn with_inputs(mut self, inputs: FormInputs) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Swap the session, returning the previous one
    pub fn set_session(&mut self, session: Arc<Session>) -> Arc<Session> {
        std::mem::replace(&mut self.session, session)
    }

    pub fn fragment_id(&self) -> Option<&FragmentId> {
        self.fragment_id.as_ref()
    }

    /// Endpoint URL of the fragment being rendered, including its id
    pub fn endpoint(&self) -> Option<String> {
        let id = self.fragment_id.as_ref()?;
        let mounted = self.session.resolve(id.as_str()).ok()?;
        Some(format!("{}?id={}", mounted.config.url(), id))
    }

    pub fn inputs(&self) -> &FormInputs {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs.get(name).map(String::as_str)
    }

    /// Typed access to the session state
    pub fn state<S: StateSchema>(&self) -> Option<Arc<S>> {
        self.session.state_as::<S>()
    }

    /// Append raw markup
    pub fn write(&mut self, markup: &str) {
        self.buffer.push_str(markup);
    }

    /// Append text, HTML-escaped
    pub fn write_text(&mut self, text: &str) {
        self.buffer.push_str(&markup::escape(text));
    }

    pub fn output(&self) -> &str {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    /// Mount a child fragment in the session and write its container
    pub fn mount<F: Fragment>(&mut self, fragment: F) -> Result<FragmentId> {
        self.mount_arc(Arc::new(fragment))
    }

    pub fn mount_arc(&mut self, fragment: Arc<dyn Fragment>) -> Result<FragmentId> {
        let config = self.catalog.get(fragment.kind())?;
        let id = self.session.mount(config.clone(), fragment)?;
        self.buffer.push_str(&markup::container(&config, &id));
        self.mounted.push(id.clone());
        Ok(id)
    }

    /// Ids mounted through this context, in order
    pub fn mounted(&self) -> &[FragmentId] {
        &self.mounted
    }

    /// Ask the client to reload the fragment being rendered. Returns false
    /// outside a fragment render.
    pub fn reload(&self) -> bool {
        match &self.fragment_id {
            Some(id) => self.session.enqueue(id.clone()),
            None => false,
        }
    }
}

/// Resolve `id` in the session, run its render and return the markup.
///
/// `kind` is the kind served by the endpoint; an id that belongs to
/// another kind is treated as unknown.
pub async fn render_fragment(
    session: Arc<Session>,
    catalog: Arc<FragmentCatalog>,
    kind: &str,
    id: &str,
    inputs: FormInputs,
) -> Result<String> {
    session.touch();

    let mounted = session.resolve(id)?;
    if mounted.config.kind() != kind {
        debug!(fragment = id, expected = kind, actual = mounted.config.kind(), "kind mismatch");
        return Err(RenderableError::fragment_not_found(id));
    }
    session.begin_render(id);

    let mut ctx =
        RenderContext::for_fragment(session.clone(), catalog, mounted.id.clone()).with_inputs(inputs);
    session.set_phase(id, RenderPhase::Rendering);
    debug!(session = %session.token(), fragment = id, kind, "rendering");

    let outcome = RENDERING
        .scope(mounted.id.clone(), mounted.fragment.render(&mut ctx))
        .await;

    let result = match outcome {
        Ok(()) if session.is_evicted() => {
            session.set_phase(id, RenderPhase::Failed);
            debug!(fragment = id, "session evicted during render");
            Err(RenderableError::fragment_not_found(id))
        }
        Ok(()) => {
            session.set_phase(id, RenderPhase::Emitted);
            Ok(ctx.take_output())
        }
        Err(reason) => {
            session.set_phase(id, RenderPhase::Failed);
            error!(session = %session.token(), fragment = id, "render failed: {:#}", reason);
            Err(RenderableError::RenderFailure {
                id: id.to_string(),
                reason,
            })
        }
    };

    session.finish_render(id);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::fragment::FragmentConfig;
    use crate::state::{ObservableField, State, StateField};
    use async_trait::async_trait;

    struct Counter {
        count: StateField<i64>,
    }

    impl StateSchema for Counter {
        fn fields(&self) -> Vec<&dyn ObservableField> {
            vec![&self.count as &dyn ObservableField]
        }
    }

    /// Writes `{label}1`, yields, then `{label}2`
    struct Slow(&'static str);

    #[async_trait]
    impl Fragment for Slow {
        fn kind(&self) -> &'static str {
            "Slow"
        }

        async fn render(&self, ctx: &mut RenderContext) -> anyhow::Result<()> {
            ctx.write(&format!("{}1", self.0));
            tokio::task::yield_now().await;
            ctx.write(&format!("{}2", self.0));
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Fragment for Broken {
        fn kind(&self) -> &'static str {
            "Broken"
        }

        async fn render(&self, _ctx: &mut RenderContext) -> anyhow::Result<()> {
            anyhow::bail!("backend unavailable")
        }
    }

    /// Bumps the count it depends on while rendering
    struct SelfWriter;

    #[async_trait]
    impl Fragment for SelfWriter {
        fn kind(&self) -> &'static str {
            "SelfWriter"
        }

        async fn render(&self, ctx: &mut RenderContext) -> anyhow::Result<()> {
            let state = ctx.state::<Counter>().expect("counter state");
            state.count.update(|c| *c += 1);
            ctx.write(&state.count.get().to_string());
            Ok(())
        }
    }

    /// Records its phase and inputs
    struct Inspector;

    #[async_trait]
    impl Fragment for Inspector {
        fn kind(&self) -> &'static str {
            "Inspector"
        }

        async fn render(&self, ctx: &mut RenderContext) -> anyhow::Result<()> {
            let id = ctx.fragment_id().expect("fragment id").clone();
            let phase = ctx.session().phase(id.as_str());
            ctx.write(&format!("{:?}|", phase));
            let name = ctx.input("name").unwrap_or("anonymous").to_string();
            ctx.write_text(&name);
            Ok(())
        }
    }

    /// Blocks until the shared gate hands it a permit
    struct Gated(Arc<tokio::sync::Semaphore>);

    #[async_trait]
    impl Fragment for Gated {
        fn kind(&self) -> &'static str {
            "Gated"
        }

        async fn render(&self, ctx: &mut RenderContext) -> anyhow::Result<()> {
            self.0.acquire().await?.forget();
            ctx.write("open");
            Ok(())
        }
    }

    fn catalog() -> Arc<FragmentCatalog> {
        let router = RouterConfig::default();
        let mut catalog = FragmentCatalog::new();
        for builder in [
            FragmentConfig::builder("Slow"),
            FragmentConfig::builder("Broken"),
            FragmentConfig::builder("Inspector"),
            FragmentConfig::builder("Gated"),
            FragmentConfig::builder("SelfWriter")
                .id("self-writer")
                .reload_on(["count"]),
            FragmentConfig::builder("Watcher").id("watcher").reload_on(["count"]),
        ] {
            catalog
                .register(builder.build(&router, Some(&["count"][..])).unwrap())
                .unwrap();
        }
        Arc::new(catalog)
    }

    fn session() -> Arc<Session> {
        Arc::new(Session::new(Some(State::new(Counter {
            count: StateField::new("count", 0),
        }))))
    }

    #[tokio::test]
    async fn test_concurrent_renders_are_isolated() {
        let session = session();
        let catalog = catalog();
        let mut root = RenderContext::new(session.clone(), catalog.clone());
        let a = root.mount(Slow("A")).unwrap();
        let b = root.mount(Slow("B")).unwrap();

        let (out_a, out_b) = tokio::join!(
            render_fragment(session.clone(), catalog.clone(), "Slow", a.as_str(), FormInputs::new()),
            render_fragment(session.clone(), catalog.clone(), "Slow", b.as_str(), FormInputs::new()),
        );
        assert_eq!(out_a.unwrap(), "A1A2");
        assert_eq!(out_b.unwrap(), "B1B2");
    }

    #[tokio::test]
    async fn test_overlapping_renders_of_one_id_keep_phase_busy() {
        let session = session();
        let catalog = catalog();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let id = RenderContext::new(session.clone(), catalog.clone())
            .mount(Gated(gate.clone()))
            .unwrap();

        let spawn_render = || {
            let (session, catalog, id) = (session.clone(), catalog.clone(), id.clone());
            tokio::spawn(async move {
                render_fragment(session, catalog, "Gated", id.as_str(), FormInputs::new()).await
            })
        };
        let first = spawn_render();
        let second = spawn_render();

        let wait_for = |count: usize| {
            let (session, id) = (session.clone(), id.clone());
            async move {
                tokio::time::timeout(std::time::Duration::from_secs(2), async {
                    while session.renders_in_flight(id.as_str()) != Some(count) {
                        tokio::task::yield_now().await;
                    }
                })
                .await
                .expect("renders in flight");
            }
        };

        wait_for(2).await;
        gate.add_permits(1);
        wait_for(1).await;
        assert_ne!(session.phase(id.as_str()), Some(RenderPhase::Idle));

        gate.add_permits(1);
        assert_eq!(first.await.unwrap().unwrap(), "open");
        assert_eq!(second.await.unwrap().unwrap(), "open");
        assert_eq!(session.phase(id.as_str()), Some(RenderPhase::Idle));
        assert_eq!(session.renders_in_flight(id.as_str()), Some(0));
    }

    #[tokio::test]
    async fn test_mount_writes_container() {
        let session = session();
        let mut root = RenderContext::new(session.clone(), catalog());
        let id = root.mount(Inspector).unwrap();

        assert!(root.output().contains(&format!(r#"id="{}""#, id)));
        assert!(root.output().contains("hx-post=\"/__renderable__/Inspector?id="));
        assert_eq!(root.mounted(), &[id.clone()]);
        assert!(session.get_component(id.as_str()).is_ok());

        let child = RenderContext::for_fragment(session.clone(), catalog(), id.clone());
        assert_eq!(
            child.endpoint(),
            Some(format!("/__renderable__/Inspector?id={}", id))
        );
        assert_eq!(root.endpoint(), None);
    }

    #[tokio::test]
    async fn test_mount_unregistered_kind_fails() {
        struct Stray;

        #[async_trait]
        impl Fragment for Stray {
            fn kind(&self) -> &'static str {
                "Stray"
            }

            async fn render(&self, _ctx: &mut RenderContext) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let mut root = RenderContext::new(session(), catalog());
        let err = root.mount(Stray).unwrap_err();
        assert!(matches!(err, RenderableError::Configuration(_)));
        assert!(root.output().is_empty());
    }

    #[tokio::test]
    async fn test_phase_and_inputs_visible_during_render() {
        let session = session();
        let catalog = catalog();
        let id = RenderContext::new(session.clone(), catalog.clone())
            .mount(Inspector)
            .unwrap();

        let inputs: FormInputs = [("name".to_string(), "<ada>".to_string())].into();
        let out = render_fragment(session.clone(), catalog, "Inspector", id.as_str(), inputs)
            .await
            .unwrap();

        assert_eq!(out, "Some(Rendering)|&lt;ada&gt;");
        assert_eq!(session.phase(id.as_str()), Some(RenderPhase::Idle));
    }

    #[tokio::test]
    async fn test_failure_keeps_fragment_registered() {
        let session = session();
        let catalog = catalog();
        let id = RenderContext::new(session.clone(), catalog.clone())
            .mount(Broken)
            .unwrap();

        let err = render_fragment(session.clone(), catalog, "Broken", id.as_str(), FormInputs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RenderableError::RenderFailure { .. }));
        assert!(err.to_string().contains("backend unavailable"));
        assert!(session.get_component(id.as_str()).is_ok());
        assert_eq!(session.phase(id.as_str()), Some(RenderPhase::Idle));
    }

    #[tokio::test]
    async fn test_self_write_does_not_requeue_renderer() {
        struct Watcher;

        #[async_trait]
        impl Fragment for Watcher {
            fn kind(&self) -> &'static str {
                "Watcher"
            }

            async fn render(&self, _ctx: &mut RenderContext) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let session = session();
        let catalog = catalog();
        let mut root = RenderContext::new(session.clone(), catalog.clone());
        root.mount(SelfWriter).unwrap();
        root.mount(Watcher).unwrap();

        let out = render_fragment(session.clone(), catalog, "SelfWriter", "self-writer", FormInputs::new())
            .await
            .unwrap();
        assert_eq!(out, "1");
        assert_eq!(session.drain_notifications().unwrap(), vec![FragmentId::new("watcher")]);

        // Outside a render both dependents are notified
        session.state_as::<Counter>().unwrap().count.set(5);
        assert_eq!(
            session.drain_notifications().unwrap(),
            vec![FragmentId::new("self-writer"), FragmentId::new("watcher")]
        );
    }

    #[tokio::test]
    async fn test_unknown_or_mismatched_id_is_not_found() {
        let session = session();
        let catalog = catalog();
        let id = RenderContext::new(session.clone(), catalog.clone())
            .mount(Inspector)
            .unwrap();

        let stale = render_fragment(session.clone(), catalog.clone(), "Inspector", "cid_0", FormInputs::new())
            .await
            .unwrap_err();
        assert!(matches!(stale, RenderableError::FragmentNotFound { .. }));

        let wrong_kind = render_fragment(session, catalog, "Slow", id.as_str(), FormInputs::new())
            .await
            .unwrap_err();
        assert!(matches!(wrong_kind, RenderableError::FragmentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_manual_reload() {
        let session = session();
        let ctx = RenderContext::for_fragment(session.clone(), catalog(), FragmentId::new("F2"));
        assert!(ctx.reload());
        assert_eq!(session.drain_notifications().unwrap(), vec![FragmentId::new("F2")]);
        assert!(!RenderContext::new(session, catalog()).reload());
    }
}
