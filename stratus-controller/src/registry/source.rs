//! Snapshot source backed by the local backend and remote control planes

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stratus_client::ClusterClient;
use stratus_core::domain::cluster::{ClusterDescriptor, ClusterId};
use stratus_core::dto::cluster::ClusterInfo;

use super::SnapshotSource;
use crate::backend::ServerlessBackend;
use crate::error::{Result, SchedError};

/// Clients for every configured remote cluster
pub type RemoteClients = HashMap<ClusterId, ClusterClient>;

/// Builds one client per remote, bounded by `timeout`
pub fn connect_remotes(
    remotes: &[ClusterDescriptor],
    timeout: Duration,
) -> anyhow::Result<RemoteClients> {
    let mut clients = HashMap::with_capacity(remotes.len());
    for remote in remotes {
        let mut client = ClusterClient::with_timeout(&remote.endpoint, timeout)?;
        if !remote.auth_user.is_empty() {
            client = client.with_credentials(&remote.auth_user, &remote.auth_password);
        }
        clients.insert(remote.id.clone(), client);
    }
    Ok(clients)
}

pub struct ClusterSnapshotSource {
    backend: Arc<dyn ServerlessBackend>,
    remotes: Arc<RemoteClients>,
}

impl ClusterSnapshotSource {
    pub fn new(backend: Arc<dyn ServerlessBackend>, remotes: Arc<RemoteClients>) -> Self {
        Self { backend, remotes }
    }
}

#[async_trait]
impl SnapshotSource for ClusterSnapshotSource {
    async fn fetch(&self, cluster: &ClusterId) -> Result<ClusterInfo> {
        if cluster.is_local() {
            return self.backend.cluster_info().await;
        }

        let client = self
            .remotes
            .get(cluster)
            .ok_or_else(|| SchedError::NotFound(format!("cluster {}", cluster)))?;
        Ok(client.get_cluster_info().await?)
    }
}
