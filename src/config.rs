//! Router and server configuration
//!
//! Defaults mirror a typical deployment: `sid` cookie for one week, htmx and
//! its SSE extension from unpkg, fragment endpoints under `/__renderable__`.
//! Every field can be overridden from `RENDERABLE_*` environment variables.

use serde::Deserialize;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// One week, in seconds
pub const DEFAULT_SESSION_COOKIE_MAX_AGE: u64 = 60 * 60 * 24 * 7;

/// Configuration shared by the session layer and the fragment routes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Cookie carrying the session token
    pub session_cookie_key: String,
    /// Cookie `Max-Age`; also the idle timeout used by the session reaper
    pub session_cookie_max_age: u64,
    pub htmx_cdn: String,
    pub htmx_sse: String,
    /// CSS class put on every fragment container
    pub loader_class: String,
    /// Prefix for the stream endpoint and default fragment URLs
    pub loader_route_prefix: String,
    /// Interval between SSE keep-alive comments
    pub keep_alive_secs: u64,
    /// Interval between idle-session sweeps
    pub reaper_interval_secs: u64,
    /// Drop derived-id fragments of the session when a page is loaded again
    pub prune_on_page_load: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            session_cookie_key: "sid".to_string(),
            session_cookie_max_age: DEFAULT_SESSION_COOKIE_MAX_AGE,
            htmx_cdn: "https://unpkg.com/htmx.org".to_string(),
            htmx_sse: "https://unpkg.com/htmx.org/dist/ext/sse.js".to_string(),
            loader_class: "__componentLoader__".to_string(),
            loader_route_prefix: "/__renderable__".to_string(),
            keep_alive_secs: 15,
            reaper_interval_secs: 60,
            prune_on_page_load: false,
        }
    }
}

impl RouterConfig {
    /// Load from `RENDERABLE_*` environment variables over the defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            session_cookie_key: env_or("RENDERABLE_SESSION_COOKIE_KEY", defaults.session_cookie_key),
            session_cookie_max_age: env_or(
                "RENDERABLE_SESSION_COOKIE_MAX_AGE",
                defaults.session_cookie_max_age,
            ),
            htmx_cdn: env_or("RENDERABLE_HTMX_CDN", defaults.htmx_cdn),
            htmx_sse: env_or("RENDERABLE_HTMX_SSE", defaults.htmx_sse),
            loader_class: env_or("RENDERABLE_LOADER_CLASS", defaults.loader_class),
            loader_route_prefix: env_or(
                "RENDERABLE_LOADER_ROUTE_PREFIX",
                defaults.loader_route_prefix,
            ),
            keep_alive_secs: env_or("RENDERABLE_KEEP_ALIVE_SECS", defaults.keep_alive_secs),
            reaper_interval_secs: env_or(
                "RENDERABLE_REAPER_INTERVAL_SECS",
                defaults.reaper_interval_secs,
            ),
            prune_on_page_load: env_or(
                "RENDERABLE_PRUNE_ON_PAGE_LOAD",
                defaults.prune_on_page_load,
            ),
        }
    }

    fn prefix(&self) -> &str {
        self.loader_route_prefix.trim_end_matches('/')
    }

    /// Path of the per-session stream endpoint
    pub fn sse_path(&self) -> String {
        format!("{}/sse", self.prefix())
    }

    /// URL of a fragment endpoint: `{prefix}/{path}`, where `prefix` falls
    /// back to `loader_route_prefix`
    pub fn fragment_url(&self, prefix: Option<&str>, path: &str) -> String {
        let prefix = prefix
            .map(|p| p.trim_end_matches('/'))
            .unwrap_or_else(|| self.prefix());
        format!("{}/{}", prefix, path.trim_start_matches('/'))
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_cookie_max_age)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }
}

/// Process-level settings for the bundled server binary
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub router: RouterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            router: RouterConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("RENDERABLE_BIND_ADDR", Self::default().bind_addr),
            router: RouterConfig::from_env(),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                warn!("Invalid {}={:?}, using default: {}", key, raw, e);
                default
            }
        },
        Err(_) => default,
    }
}
