//! Error handling for the live fragment engine
//!
//! Library errors are `thiserror` enums. Fragment render logic itself returns
//! `anyhow::Result`, which is wrapped into [`RenderableError::RenderFailure`]
//! at the render boundary.

use thiserror::Error;

/// Main error type for sessions, registries and renders
#[derive(Error, Debug)]
pub enum RenderableError {
    /// Presented token is unknown to the store. Recovered by creating a
    /// fresh session; never surfaced to HTTP callers.
    #[error("Session not found: {token}")]
    SessionNotFound { token: String },

    #[error("Fragment '{id}' not found in session registry")]
    FragmentNotFound { id: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Render of fragment '{id}' failed: {reason:#}")]
    RenderFailure { id: String, reason: anyhow::Error },
}

impl RenderableError {
    pub fn fragment_not_found(id: impl Into<String>) -> Self {
        RenderableError::FragmentNotFound { id: id.into() }
    }

    /// True for failures that only degrade a single fragment area
    pub fn is_fragment_local(&self) -> bool {
        matches!(
            self,
            RenderableError::FragmentNotFound { .. } | RenderableError::RenderFailure { .. }
        )
    }
}

/// Registration-time errors. Raised before serving starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Fragment kind '{kind}' uses reload_on but has no explicit id")]
    ReloadWithoutId { kind: String },

    #[error("Fragment kind '{kind}' uses reload_on but no state schema is configured")]
    ReloadWithoutSchema { kind: String },

    #[error("Fragment kind '{kind}' reloads on unknown state field '{field}'")]
    UnknownField { kind: String, field: String },

    #[error("Invalid fragment id '{id}' for kind '{kind}': {reason}")]
    InvalidId {
        kind: String,
        id: String,
        reason: String,
    },

    #[error("Fragment kind '{kind}' is already registered")]
    DuplicateKind { kind: String },

    #[error("Fragment kind '{kind}' routes to '{url}', which is already taken by '{existing}'")]
    DuplicateRoute {
        kind: String,
        url: String,
        existing: String,
    },

    #[error("Fragment kind '{kind}' is not registered")]
    UnregisteredKind { kind: String },
}

pub type Result<T> = std::result::Result<T, RenderableError>;

#[cfg(feature = "server")]
mod response {
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
    };

    use super::RenderableError;

    impl IntoResponse for RenderableError {
        fn into_response(self) -> Response {
            let status = match &self {
                RenderableError::SessionNotFound { .. }
                | RenderableError::FragmentNotFound { .. } => StatusCode::NOT_FOUND,
                RenderableError::Configuration(_) | RenderableError::RenderFailure { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };

            if status.is_server_error() {
                tracing::error!("{}", self);
            } else {
                tracing::warn!("{}", self);
            }

            (status, self.to_string()).into_response()
        }
    }
}
