//! Per-session notification channel
//!
//! Unbounded FIFO of fragment ids. State fields and manual reloads push
//! through a [`Notifier`]; the push dispatcher is the single consumer.

use tokio::sync::{mpsc, Mutex};

use crate::fragment::FragmentId;

/// Producer handle onto one session's channel
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<FragmentId>,
}

impl Notifier {
    /// Enqueue synchronously. Returns false only if the channel is gone.
    pub fn push(&self, id: FragmentId) -> bool {
        self.tx.send(id).is_ok()
    }

    /// True if both handles feed the same channel
    pub fn same_channel(&self, other: &Notifier) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

#[derive(Debug)]
pub struct NotificationChannel {
    tx: mpsc::UnboundedSender<FragmentId>,
    rx: Mutex<mpsc::UnboundedReceiver<FragmentId>>,
}

impl NotificationChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn notifier(&self) -> Notifier {
        Notifier {
            tx: self.tx.clone(),
        }
    }

    pub fn push(&self, id: FragmentId) -> bool {
        self.tx.send(id).is_ok()
    }

    /// Wait for the next id and consume it.
    ///
    /// Cancel safe: dropping the future before it resolves loses nothing.
    pub async fn next(&self) -> Option<FragmentId> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Take everything queued right now without waiting.
    ///
    /// `None` while a consumer is parked in [`NotificationChannel::next`];
    /// the queue is left to it.
    pub fn drain(&self) -> Option<Vec<FragmentId>> {
        let mut rx = self.rx.try_lock().ok()?;
        let mut drained = Vec::new();
        while let Ok(id) = rx.try_recv() {
            drained.push(id);
        }
        Some(drained)
    }
}

impl Default for NotificationChannel {
    fn default() -> Self {
        Self::new()
    }
}
