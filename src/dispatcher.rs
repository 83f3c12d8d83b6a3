//! Push dispatcher: forwards a session's queued fragment ids to one open
//! stream connection.
//!
//! One dispatcher runs per stream. It stops when the stream sink closes
//! (client disconnect) or the session is evicted elsewhere, and on the way
//! out removes the session from the store.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::fragment::FragmentId;
use crate::session::Session;
use crate::store::SessionStore;

/// One notification to the client: the fragment with this id should reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    fragment_id: FragmentId,
}

impl StreamEvent {
    /// Payload carried by every event; the event name is the signal
    pub const DATA: &'static str = "-";

    pub fn new(fragment_id: FragmentId) -> Self {
        Self { fragment_id }
    }

    pub fn fragment_id(&self) -> &FragmentId {
        &self.fragment_id
    }

    /// Wire form of the event
    pub fn frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.fragment_id, Self::DATA)
    }
}

pub struct PushDispatcher {
    session: Arc<Session>,
    store: SessionStore,
    sink: mpsc::Sender<StreamEvent>,
}

impl PushDispatcher {
    pub fn new(session: Arc<Session>, store: SessionStore, sink: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            session,
            store,
            sink,
        }
    }

    /// Run until disconnect or eviction. Returns the number of events sent.
    pub async fn run(self) -> usize {
        let token = self.session.token().clone();
        let streams = self.session.stream_opened();
        info!(session = %token, streams, "push dispatcher started");

        let mut sent = 0;
        loop {
            if self.sink.is_closed() {
                debug!(session = %token, "stream closed by client");
                break;
            }

            let next = tokio::select! {
                biased;
                _ = self.sink.closed() => {
                    debug!(session = %token, "stream closed by client");
                    break;
                }
                _ = self.session.wait_evicted() => {
                    debug!(session = %token, "session evicted, closing stream");
                    break;
                }
                next = self.session.get_updated_component_id() => next,
            };

            let Some(fragment_id) = next else {
                break;
            };
            debug!(session = %token, fragment = %fragment_id, "pushing reload");
            if self.sink.send(StreamEvent::new(fragment_id)).await.is_err() {
                debug!(session = %token, "stream closed while sending");
                break;
            }
            sent += 1;
        }

        self.session.stream_closed();
        self.store.remove_session(token.as_str()).await;
        info!(session = %token, sent, "push dispatcher stopped");
        sent
    }
}
