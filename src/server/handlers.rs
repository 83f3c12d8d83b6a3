//! Request handlers
//!
//! - `GET  {prefix}/sse`          - per-session reload stream
//! - `GET|POST {fragment url}?id=` - render one mounted fragment
//! - `GET  {page path}`           - page shell with its root fragment mounted

use axum::{
    extract::{rejection::FormRejection, State},
    http::{HeaderMap, Method},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    Form,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

use super::cookie;
use super::router::PageRoute;
use super::AppState;
use crate::dispatcher::{PushDispatcher, StreamEvent};
use crate::error::RenderableError;
use crate::markup;
use crate::render::{self, FormInputs, RenderContext};

/// Events buffered per stream before the dispatcher waits on the client
const STREAM_BUFFER: usize = 64;

/// Query string of a fragment endpoint
#[derive(Debug, Default, Deserialize)]
pub struct FragmentQuery {
    pub id: Option<String>,
}

/// GET {prefix}/sse
pub(crate) async fn stream_endpoint(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> (HeaderMap, Sse<impl Stream<Item = Result<Event, Infallible>>>) {
    let token = cookie::session_token(&headers, &app.config.session_cookie_key);
    let (session, created) = app.store.get_or_create(token.as_deref()).await;
    let set_cookie = cookie::session_cookie(&app.config, &session, created);

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(PushDispatcher::new(session, app.store.clone(), tx).run());

    let stream = ReceiverStream::new(rx).map(|event: StreamEvent| {
        Ok::<_, Infallible>(
            Event::default()
                .event(event.fragment_id().as_str())
                .data(StreamEvent::DATA),
        )
    });

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(app.config.keep_alive())
            .text("keep-alive"),
    );
    (set_cookie, sse)
}

/// GET|POST {fragment url}?id=<id>
///
/// POST inputs come from the body untouched. A GET's form is its query
/// string, so the routing `id` is dropped from it.
pub(crate) async fn fragment_endpoint(
    kind: &'static str,
    app: AppState,
    method: Method,
    headers: HeaderMap,
    query: FragmentQuery,
    form: Result<Form<FormInputs>, FormRejection>,
) -> Response {
    let token = cookie::session_token(&headers, &app.config.session_cookie_key);
    let (session, created) = app.store.get_or_create(token.as_deref()).await;
    let set_cookie = cookie::session_cookie(&app.config, &session, created);

    let mut inputs = match form {
        Ok(Form(inputs)) => inputs,
        Err(rejection) => {
            debug!(kind, "no form inputs: {}", rejection);
            FormInputs::new()
        }
    };
    if method != Method::POST {
        inputs.remove("id");
    }

    let Some(id) = query.id else {
        return (set_cookie, RenderableError::fragment_not_found("")).into_response();
    };

    match render::render_fragment(session, app.catalog.clone(), kind, &id, inputs).await {
        Ok(markup) => (set_cookie, Html(markup)).into_response(),
        Err(e) => (set_cookie, e).into_response(),
    }
}

/// GET {page path}
pub(crate) async fn page_endpoint(page: Arc<PageRoute>, app: AppState, headers: HeaderMap) -> Response {
    let token = cookie::session_token(&headers, &app.config.session_cookie_key);
    let (session, created) = app.store.get_or_create(token.as_deref()).await;
    let set_cookie = cookie::session_cookie(&app.config, &session, created);

    if app.config.prune_on_page_load {
        session.prune_derived(&HashSet::new());
    }

    let mut ctx = RenderContext::new(session, app.catalog.clone());
    match ctx.mount_arc((page.factory)()) {
        Ok(id) => {
            debug!(path = %page.path, root = %id, "page mounted");
            let html = markup::page_shell(&app.config, &page.options, ctx.output());
            (set_cookie, Html(html)).into_response()
        }
        Err(e) => (set_cookie, e).into_response(),
    }
}
