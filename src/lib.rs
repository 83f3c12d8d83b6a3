//! Live server-rendered fragments
//!
//! Application state lives on the server in per-session [`State`] schemas.
//! Fragments mounted in a session subscribe to state fields; mutating a
//! field queues the ids of its dependents on the session's notification
//! channel, and the push dispatcher streams each id to the browser as an
//! SSE event. The browser then re-fetches just that fragment.
//!
//! Core modules are runtime-only; the `server` feature adds the axum
//! router (stream endpoint, fragment endpoints, pages).

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fragment;
pub mod markup;
pub mod reaper;
pub mod registry;
pub mod render;
pub mod session;
pub mod state;
pub mod store;

#[cfg(feature = "server")]
pub mod server;

pub use config::{RouterConfig, ServerConfig};
pub use dispatcher::{PushDispatcher, StreamEvent};
pub use error::{ConfigurationError, RenderableError, Result};
pub use fragment::{Fragment, FragmentCatalog, FragmentConfig, FragmentConfigBuilder, FragmentId};
pub use markup::PageOptions;
pub use reaper::SessionReaper;
pub use render::{render_fragment, FormInputs, RenderContext, RenderPhase};
pub use session::{Session, SessionToken};
pub use state::{ObservableField, State, StateField, StateSchema};
pub use store::SessionStore;

#[cfg(feature = "server")]
pub use server::{AppState, LiveRouter};
