use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::manager::IndexManager;

/// Background snapshotter: persists the RAG index set on a fixed cadence
/// and once more on shutdown. Failed saves are logged inside
/// `IndexManager::save_all` and never abort the daemon.
pub struct SnapshotDaemon {
    indices: Arc<IndexManager>,
    period: Duration,
}

impl SnapshotDaemon {
    pub fn new(indices: Arc<IndexManager>, period: Duration) -> Self {
        Self { indices, period }
    }

    /// Main loop. Runs until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(period_secs = self.period.as_secs(), "snapshot daemon started");
        let mut interval = tokio::time::interval(self.period);
        // The first tick fires immediately; skip it so the cadence starts
        // one full period after startup.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let saved = self.indices.save_all().await;
                    debug!(saved, "periodic snapshot");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let saved = self.indices.save_all().await;
                        info!(saved, "final snapshot; daemon shutting down");
                        break;
                    }
                }
            }
        }
    }
}
