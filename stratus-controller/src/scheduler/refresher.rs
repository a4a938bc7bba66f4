//! Periodic refresh of every cluster's resource snapshot

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, instrument};

use crate::registry::ClusterRegistry;

pub struct RegistryRefresher {
    registry: Arc<ClusterRegistry>,
    interval: Duration,
}

impl RegistryRefresher {
    pub fn new(registry: Arc<ClusterRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Refreshes immediately, then every interval until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            clusters = self.registry.ids().len(),
            "Starting cluster registry refresher"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.registry.refresh_all().await;
                    tracing::debug!("Cluster snapshots refreshed");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Cluster registry refresher shutting down");
                        break;
                    }
                }
            }
        }
    }
}
