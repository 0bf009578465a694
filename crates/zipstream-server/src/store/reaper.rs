use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::store::SessionStore;

/// Background janitor that evicts sessions nobody downloaded before their TTL.
///
/// Purely an upper bound on store size: the download path re-checks TTL itself.
pub struct SessionReaper {
    store: Arc<SessionStore>,
    ttl: Duration,
    period: Duration,
}

impl SessionReaper {
    pub fn new(store: Arc<SessionStore>, ttl: Duration, period: Duration) -> Self {
        Self { store, ttl, period }
    }

    /// One cleanup pass. Returns the number of evicted sessions.
    pub fn sweep(&self) -> usize {
        let evicted = self.store.sweep_expired(self.ttl);
        if evicted > 0 {
            info!(evicted, remaining = self.store.len(), "Cleaned up expired sessions");
        } else {
            debug!("Reaper tick: nothing to clean");
        }
        evicted
    }

    /// Tick every `period` until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Session reaper started (ttl: {:?}, interval: {:?})",
            self.ttl, self.period
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Session reaper stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_counts_evictions() {
        let store = Arc::new(SessionStore::new());
        let reaper = SessionReaper::new(
            store.clone(),
            Duration::from_secs(60),
            Duration::from_secs(300),
        );

        store.create(vec!["https://example.com/a".to_string()], "a.zip".to_string());
        assert_eq!(reaper.sweep(), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(reaper.sweep(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_evicts_on_tick_and_stops() {
        let store = Arc::new(SessionStore::new());
        let reaper = Arc::new(SessionReaper::new(
            store.clone(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = reaper.spawn(rx);

        let token = store.create(vec!["https://example.com/a".to_string()], "a.zip".to_string());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store.lookup(&token).is_some());

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(store.lookup(&token).is_none());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
