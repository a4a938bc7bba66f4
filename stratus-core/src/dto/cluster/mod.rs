//! Cluster DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cluster::{BackendKind, ClusterId, ResourceSnapshot};

/// Capacity and usage report served by a control plane about its own cluster
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    pub backend: Option<BackendKind>,
    pub nodes: u32,
    pub total_cpu_millis: u64,
    pub free_cpu_millis: u64,
    pub total_memory_bytes: u64,
    pub free_memory_bytes: u64,
    pub total_gpu: u32,
    pub free_gpu: u32,
}

/// Circuit breaker state of a cluster as seen by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Registry entry as exposed to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterView {
    pub id: ClusterId,
    pub endpoint: Option<String>,
    pub capability: Option<BackendKind>,
    pub snapshot: ResourceSnapshot,
    pub fresh: bool,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    pub observed_at: DateTime<Utc>,
}
