//! HTTP surface: stream endpoint, per-kind fragment endpoints and pages

mod cookie;
mod handlers;
mod router;

use std::sync::Arc;

use crate::config::RouterConfig;
use crate::fragment::FragmentCatalog;
use crate::store::SessionStore;

pub use handlers::FragmentQuery;
pub use router::LiveRouter;

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub store: SessionStore,
    pub catalog: Arc<FragmentCatalog>,
    pub config: Arc<RouterConfig>,
}
