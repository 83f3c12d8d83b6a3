//! Background eviction of idle sessions

use std::time::Duration;

use crate::store::SessionStore;

/// Periodically evicts sessions idle for longer than `max_idle`.
/// Spawn [`SessionReaper::run`] as a background task via `tokio::spawn`.
pub struct SessionReaper {
    store: SessionStore,
    max_idle: Duration,
    interval: Duration,
}

impl SessionReaper {
    pub fn new(store: SessionStore, max_idle: Duration, interval: Duration) -> Self {
        Self {
            store,
            max_idle,
            interval,
        }
    }

    /// One pass over the store. Returns the number of evicted sessions.
    pub async fn sweep(&self) -> usize {
        let evicted = self.store.evict_idle(self.max_idle).await;
        if !evicted.is_empty() {
            tracing::info!(
                "SessionReaper evicted {} idle session(s), {} remaining",
                evicted.len(),
                self.store.session_count().await
            );
        }
        evicted.len()
    }

    /// Never returns under normal operation
    pub async fn run(self) {
        tracing::info!(
            "SessionReaper started (interval={:?}, max_idle={:?})",
            self.interval,
            self.max_idle
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweep_evicts_idle_sessions() {
        let store = SessionStore::new();
        let session = store.create_session().await;
        let reaper = SessionReaper::new(store.clone(), Duration::ZERO, Duration::from_secs(60));

        assert_eq!(reaper.sweep().await, 1);
        assert!(session.is_evicted());
        assert_eq!(store.session_count().await, 0);
        assert_eq!(reaper.sweep().await, 0);
    }

    #[tokio::test]
    async fn test_run_sweeps_on_interval() {
        let store = SessionStore::new();
        store.create_session().await;
        let reaper = SessionReaper::new(store.clone(), Duration::ZERO, Duration::from_millis(10));
        let handle = tokio::spawn(reaper.run());

        tokio::time::timeout(Duration::from_secs(1), async {
            while store.session_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reaper did not evict");
        handle.abort();
    }
}
