//! Builder for the live fragment router
//!
//! ```ignore
//! let app = LiveRouter::new(RouterConfig::from_env())
//!     .with_state_schema::<CounterState>()
//!     .fragment(FragmentConfig::builder("CountDisplay").id("count").reload_on(["count"]))?
//!     .page("/", PageOptions::default(), || CounterPage)?
//!     .into_router();
//! ```

use axum::{
    extract::{rejection::FormRejection, Query, State},
    http::{HeaderMap, Method},
    routing::get,
    Form, Router,
};
use std::sync::Arc;
use tracing::info;

use super::handlers::{self, FragmentQuery};
use super::AppState;
use crate::config::RouterConfig;
use crate::error::ConfigurationError;
use crate::fragment::{Fragment, FragmentCatalog, FragmentConfigBuilder};
use crate::markup::PageOptions;
use crate::render::FormInputs;
use crate::state::{self, StateSchema};
use crate::store::SessionStore;

type PageFactory = Arc<dyn Fn() -> Arc<dyn Fragment> + Send + Sync>;

pub(crate) struct PageRoute {
    pub(crate) path: String,
    pub(crate) options: PageOptions,
    pub(crate) factory: PageFactory,
}

pub struct LiveRouter {
    config: RouterConfig,
    catalog: FragmentCatalog,
    store: SessionStore,
    schema_fields: Option<Vec<&'static str>>,
    pages: Vec<PageRoute>,
}

impl LiveRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            catalog: FragmentCatalog::new(),
            store: SessionStore::new(),
            schema_fields: None,
            pages: Vec::new(),
        }
    }

    /// Give every session a fresh `S::default()` as its state. Call before
    /// registering fragments that reload on its fields.
    pub fn with_state_schema<S: StateSchema + Default>(mut self) -> Self {
        self.schema_fields = Some(state::State::new(S::default()).field_names());
        self.store = SessionStore::with_schema(|| state::State::new(S::default()));
        self
    }

    /// Register a fragment kind and its endpoint
    pub fn fragment(mut self, builder: FragmentConfigBuilder) -> Result<Self, ConfigurationError> {
        let config = builder.build(&self.config, self.schema_fields.as_deref())?;
        if config.url() == self.config.sse_path() {
            return Err(ConfigurationError::DuplicateRoute {
                kind: config.kind().to_string(),
                url: config.url().to_string(),
                existing: "stream endpoint".to_string(),
            });
        }
        let config = self.catalog.register(config)?;
        info!(kind = config.kind(), url = config.url(), "registered fragment");
        Ok(self)
    }

    /// Register a page whose root fragment is built by `factory` for every
    /// load. The root's kind must already be registered.
    pub fn page<F, Fac>(
        mut self,
        path: impl Into<String>,
        options: PageOptions,
        factory: Fac,
    ) -> Result<Self, ConfigurationError>
    where
        F: Fragment,
        Fac: Fn() -> F + Send + Sync + 'static,
    {
        let path = path.into();
        let kind = factory().kind();
        self.catalog.get(kind)?;

        let taken = self
            .catalog
            .iter()
            .find(|c| c.url() == path)
            .map(|c| c.kind().to_string())
            .or_else(|| {
                self.pages
                    .iter()
                    .any(|p| p.path == path)
                    .then(|| "page".to_string())
            })
            .or_else(|| (path == self.config.sse_path()).then(|| "stream endpoint".to_string()));
        if let Some(existing) = taken {
            return Err(ConfigurationError::DuplicateRoute {
                kind: kind.to_string(),
                url: path,
                existing,
            });
        }

        info!(path = %path, root = kind, "registered page");
        self.pages.push(PageRoute {
            path,
            options,
            factory: Arc::new(move || Arc::new(factory()) as Arc<dyn Fragment>),
        });
        Ok(self)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Handle onto the session store, e.g. for a reaper or for tests
    pub fn store(&self) -> SessionStore {
        self.store.clone()
    }

    pub fn into_router(self) -> Router {
        let state = AppState {
            store: self.store,
            catalog: Arc::new(self.catalog),
            config: Arc::new(self.config),
        };

        let mut router: Router<AppState> =
            Router::new().route(&state.config.sse_path(), get(handlers::stream_endpoint));

        for config in state.catalog.iter() {
            let kind = config.kind();
            let handler = move |State(app): State<AppState>,
                                method: Method,
                                headers: HeaderMap,
                                Query(query): Query<FragmentQuery>,
                                form: Result<Form<FormInputs>, FormRejection>| async move {
                handlers::fragment_endpoint(kind, app, method, headers, query, form).await
            };
            router = router.route(config.url(), get(handler).post(handler));
        }

        for page in self.pages {
            let page = Arc::new(page);
            let path = page.path.clone();
            let handler = move |State(app): State<AppState>, headers: HeaderMap| {
                let page = page.clone();
                async move { handlers::page_endpoint(page, app, headers).await }
            };
            router = router.route(&path, get(handler));
        }

        router.with_state(state)
    }
}
