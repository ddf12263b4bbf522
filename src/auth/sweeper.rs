//! Background nonce sweep
//!
//! An owned periodic task: started with the server, stopped on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::nonce::NonceStore;
use crate::store::KeyValueStore;

/// Handle to the running sweep task
pub struct NonceSweeper {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl NonceSweeper {
    /// Spawn the sweep loop. The first pass runs immediately.
    pub fn start(
        nonces: Arc<NonceStore>,
        store: Arc<dyn KeyValueStore>,
        interval: Duration,
    ) -> Self {
        let (shutdown, mut stop) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval_secs = interval.as_secs(), "Nonce sweeper started");
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        if let Err(e) = nonces.sweep_expired().await {
                            tracing::error!(error = %e, "Nonce sweep failed");
                        }
                        if let Err(e) = store.purge_expired().await {
                            tracing::error!(error = %e, "Store purge failed");
                        }
                    }
                }
            }
            tracing::info!("Nonce sweeper stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the task and wait for it to finish its current pass
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Nonce sweeper task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::auth::nonce::{NonceRecord, NonceSettings};
    use crate::store::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_and_stops() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let nonces = Arc::new(NonceStore::new(store.clone(), NonceSettings::default()));

        nonces
            .put_record(&NonceRecord {
                value: "agedagedaged".to_string(),
                issued_at: Utc::now() - chrono::Duration::minutes(11),
                used: false,
            })
            .await
            .unwrap();
        let fresh = nonces.issue().await.unwrap();

        let sweeper = NonceSweeper::start(nonces.clone(), store.clone(), Duration::from_secs(300));
        // Let the immediate first tick run
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!store.exists("nonce:agedagedaged").await.unwrap());
        assert!(store.exists(&format!("nonce:{fresh}")).await.unwrap());

        sweeper.stop().await;
    }
}
