//! Session cookie parsing and issuing

use axum::http::{
    header::{COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use tracing::warn;

use crate::config::RouterConfig;
use crate::session::Session;

/// Token from the request's `Cookie` headers, if present
pub(crate) fn session_token(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == key)
        .map(|(_, token)| token.trim_matches('"').to_string())
        .filter(|token| !token.is_empty())
}

/// `Set-Cookie` header for a newly created session; empty otherwise
pub(crate) fn session_cookie(config: &RouterConfig, session: &Session, created: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if !created {
        return headers;
    }

    let cookie = format!(
        "{}={}; HttpOnly; Max-Age={}; Path=/",
        config.session_cookie_key,
        session.token(),
        config.session_cookie_max_age
    );
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            headers.insert(SET_COOKIE, value);
        }
        Err(e) => warn!("Cannot encode session cookie: {}", e),
    }
    headers
}
