//! Cluster domain types
//!
//! A cluster is either the local Kubernetes cluster this control plane runs
//! on, or a remote cluster running another instance of the control plane.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::service::ResourceRequest;
use crate::dto::cluster::ClusterInfo;

/// Reserved identifier of the local cluster
pub const LOCAL_CLUSTER_ID: &str = "local";

/// Identifier of a cluster, unique within one control plane's configuration
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The implicit, zero-network-cost local candidate
    pub fn local() -> Self {
        Self(LOCAL_CLUSTER_ID.to_string())
    }

    pub fn is_local(&self) -> bool {
        self.0 == LOCAL_CLUSTER_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClusterId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Serverless runtime a cluster executes services with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Raw Kubernetes batch jobs, asynchronous only
    Kube,
    Openfaas,
    Knative,
}

impl BackendKind {
    /// Whether this runtime supports request/response invocation
    pub fn supports_sync(&self) -> bool {
        matches!(self, BackendKind::Openfaas | BackendKind::Knative)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Kube => write!(f, "kube"),
            BackendKind::Openfaas => write!(f, "openfaas"),
            BackendKind::Knative => write!(f, "knative"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kube" | "kubernetes" => Ok(BackendKind::Kube),
            "openfaas" => Ok(BackendKind::Openfaas),
            "knative" => Ok(BackendKind::Knative),
            other => Err(format!(
                "unknown backend '{}', must be \"openfaas\" or \"knative\"",
                other
            )),
        }
    }
}

/// Static description of a configured remote cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    pub id: ClusterId,
    /// Base URL of the remote control plane
    pub endpoint: String,
    #[serde(default)]
    pub auth_user: String,
    #[serde(default, skip_serializing)]
    pub auth_password: String,
    /// Backend the remote cluster declares it runs
    #[serde(default = "default_capability")]
    pub capability: BackendKind,
}

fn default_capability() -> BackendKind {
    BackendKind::Kube
}

/// Last-known capacity and usage figures of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub total_cpu_millis: u64,
    pub free_cpu_millis: u64,
    pub total_memory_bytes: u64,
    pub free_memory_bytes: u64,
    pub total_gpu: u32,
    pub free_gpu: u32,
    /// When the numbers were last refreshed, `None` if never polled
    pub last_updated: Option<DateTime<Utc>>,
    pub reachable: bool,
}

impl ResourceSnapshot {
    /// Builds a fresh, reachable snapshot from a cluster's status report
    pub fn from_info(info: &ClusterInfo, now: DateTime<Utc>) -> Self {
        Self {
            total_cpu_millis: info.total_cpu_millis,
            free_cpu_millis: info.free_cpu_millis,
            total_memory_bytes: info.total_memory_bytes,
            free_memory_bytes: info.free_memory_bytes,
            total_gpu: info.total_gpu,
            free_gpu: info.free_gpu,
            last_updated: Some(now),
            reachable: true,
        }
    }

    /// Whether the snapshot is recent enough to be trusted
    ///
    /// Never-polled snapshots are never fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.last_updated {
            Some(updated) => now.signed_duration_since(updated) <= max_age,
            None => false,
        }
    }

    /// Whether the free resources can hold one execution of `request`
    pub fn fits(&self, request: &ResourceRequest) -> bool {
        self.free_cpu_millis >= request.cpu_millis
            && self.free_memory_bytes >= request.memory_bytes
            && self.free_gpu >= request.gpus()
    }

    pub fn normalized_free_cpu(&self) -> f64 {
        ratio(self.free_cpu_millis, self.total_cpu_millis)
    }

    pub fn normalized_free_memory(&self) -> f64 {
        ratio(self.free_memory_bytes, self.total_memory_bytes)
    }
}

fn ratio(free: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (free as f64 / total as f64).clamp(0.0, 1.0)
    }
}
