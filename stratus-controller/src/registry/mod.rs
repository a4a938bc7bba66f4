//! Cluster registry
//!
//! Holds every cluster this control plane may place work on (the local
//! one plus the configured remotes) with its last-known resource snapshot
//! and delegation circuit. Each cluster's mutable state sits behind its own
//! lock, which is never held across a network call.

pub mod circuit;
pub mod source;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use stratus_core::domain::cluster::{BackendKind, ClusterDescriptor, ClusterId, ResourceSnapshot};
use stratus_core::domain::service::Service;
use stratus_core::dto::cluster::{CircuitState, ClusterInfo, ClusterView};

use crate::config::CircuitConfig;
use crate::error::{Result, SchedError};
use circuit::Circuit;

pub use source::ClusterSnapshotSource;

/// Where snapshots come from
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, cluster: &ClusterId) -> Result<ClusterInfo>;
}

/// A cluster eligible for a service, as seen at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: ClusterId,
    /// From the service's eligibility list, 0 for local
    pub priority: u32,
    pub snapshot: ResourceSnapshot,
    pub circuit: CircuitState,
}

impl Candidate {
    pub fn is_local(&self) -> bool {
        self.id.is_local()
    }
}

#[derive(Debug, Default)]
struct EntryState {
    snapshot: ResourceSnapshot,
    circuit: Circuit,
}

#[derive(Debug)]
struct Entry {
    /// `None` for the local cluster
    descriptor: Option<ClusterDescriptor>,
    state: Mutex<EntryState>,
}

impl Entry {
    fn new(descriptor: Option<ClusterDescriptor>) -> Self {
        Self {
            descriptor,
            state: Mutex::new(EntryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct ClusterRegistry {
    entries: BTreeMap<ClusterId, Entry>,
    local_backend: Option<BackendKind>,
    source: Arc<dyn SnapshotSource>,
    circuit: CircuitConfig,
    freshness: Duration,
    refresh_timeout: Duration,
}

impl ClusterRegistry {
    pub fn new(
        remotes: Vec<ClusterDescriptor>,
        source: Arc<dyn SnapshotSource>,
        circuit: CircuitConfig,
        freshness: Duration,
        refresh_timeout: Duration,
    ) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(ClusterId::local(), Entry::new(None));
        for descriptor in remotes {
            entries.insert(descriptor.id.clone(), Entry::new(Some(descriptor)));
        }

        Self {
            entries,
            local_backend: None,
            source,
            circuit,
            freshness,
            refresh_timeout,
        }
    }

    /// Records the local backend for the operator view
    pub fn with_local_backend(mut self, backend: BackendKind) -> Self {
        self.local_backend = Some(backend);
        self
    }

    pub fn ids(&self) -> Vec<ClusterId> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, id: &ClusterId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Clusters `service` may run on, ordered by (priority, id)
    ///
    /// Local is always included. Eligibility entries naming unknown
    /// clusters are ignored.
    pub fn list_candidates(&self, service: &Service) -> Vec<Candidate> {
        let now = Instant::now();
        let mut candidates: Vec<Candidate> = self
            .entries
            .iter()
            .filter_map(|(id, entry)| {
                let priority = service.priority_for(id)?;
                let state = entry.lock();
                Some(Candidate {
                    id: id.clone(),
                    priority,
                    snapshot: state.snapshot,
                    circuit: state.circuit.state(now, &self.circuit),
                })
            })
            .collect();

        for eligible in &service.clusters {
            if !self.contains(&eligible.id) {
                tracing::debug!(service = %service.name, cluster = %eligible.id, "Ignoring unknown cluster in eligibility list");
            }
        }

        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        candidates
    }

    pub fn snapshot(&self, id: &ClusterId) -> Option<ResourceSnapshot> {
        self.entries.get(id).map(|entry| entry.lock().snapshot)
    }

    /// Pulls a fresh snapshot for one cluster
    ///
    /// On failure the cluster is marked unreachable and its previous
    /// numbers are kept as they were.
    pub async fn refresh(&self, id: &ClusterId) -> Result<()> {
        let Some(entry) = self.entries.get(id) else {
            return Err(SchedError::NotFound(format!("cluster {}", id)));
        };

        let fetched = match tokio::time::timeout(self.refresh_timeout, self.source.fetch(id)).await {
            Ok(result) => result,
            Err(elapsed) => Err(elapsed.into()),
        };

        let mut state = entry.lock();
        match fetched {
            Ok(info) => {
                state.snapshot = ResourceSnapshot::from_info(&info, Utc::now());
                tracing::debug!(cluster = %id, free_cpu = info.free_cpu_millis, "Snapshot refreshed");
                Ok(())
            }
            Err(e) => {
                if state.snapshot.reachable {
                    tracing::warn!(cluster = %id, error = %e, "Cluster became unreachable");
                }
                state.snapshot.reachable = false;
                Err(e)
            }
        }
    }

    /// Refreshes every cluster concurrently
    pub async fn refresh_all(&self) {
        let refreshes = self.entries.keys().map(|id| async move {
            if let Err(e) = self.refresh(id).await {
                tracing::debug!(cluster = %id, error = %e, "Snapshot refresh failed");
            }
        });
        futures_util::future::join_all(refreshes).await;
    }

    /// Claims the cluster's circuit for one delegation attempt
    ///
    /// `false` when the circuit is open, or half-open with its single
    /// trial already taken by a concurrent delegation.
    pub fn begin_delegation(&self, id: &ClusterId) -> bool {
        match self.entries.get(id) {
            Some(entry) => entry.lock().circuit.try_begin(Instant::now(), &self.circuit),
            None => false,
        }
    }

    /// Feeds a delegation outcome into the cluster's circuit
    pub fn mark_delegation_result(&self, id: &ClusterId, success: bool) {
        let Some(entry) = self.entries.get(id) else {
            return;
        };
        let mut state = entry.lock();
        if success {
            state.circuit.record_success();
        } else {
            let now = Instant::now();
            state.circuit.record_failure(now, &self.circuit);
            if state.circuit.state(now, &self.circuit) == CircuitState::Open {
                tracing::warn!(
                    cluster = %id,
                    failures = state.circuit.consecutive_failures(),
                    "Delegation circuit open"
                );
            }
        }
    }

    /// Operator view of every cluster
    pub fn views(&self) -> Vec<ClusterView> {
        let now = Instant::now();
        let observed_at: DateTime<Utc> = Utc::now();
        let freshness = to_chrono(self.freshness);

        self.entries
            .iter()
            .map(|(id, entry)| {
                let state = entry.lock();
                ClusterView {
                    id: id.clone(),
                    endpoint: entry.descriptor.as_ref().map(|d| d.endpoint.clone()),
                    capability: match &entry.descriptor {
                        Some(d) => Some(d.capability),
                        None => self.local_backend,
                    },
                    snapshot: state.snapshot,
                    fresh: state.snapshot.is_fresh(observed_at, freshness),
                    circuit: state.circuit.state(now, &self.circuit),
                    consecutive_failures: state.circuit.consecutive_failures(),
                    observed_at,
                }
            })
            .collect()
    }
}

/// Converts a configured duration for comparisons against timestamps
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSnapshots, info, service_on};

    fn remote(id: &str) -> ClusterDescriptor {
        ClusterDescriptor {
            id: ClusterId::new(id),
            endpoint: format!("http://{}.example:8080", id),
            auth_user: String::new(),
            auth_password: String::new(),
            capability: BackendKind::Kube,
        }
    }

    fn registry(source: Arc<FakeSnapshots>) -> ClusterRegistry {
        ClusterRegistry::new(
            vec![remote("west"), remote("east")],
            source,
            CircuitConfig::default(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_candidates_filtered_and_ordered() {
        let registry = registry(Arc::new(FakeSnapshots::default()));
        let service = service_on(&[("west", 2), ("east", 2), ("north", 0)]);

        let ids: Vec<_> = registry
            .list_candidates(&service)
            .into_iter()
            .map(|c| c.id.to_string())
            .collect();
        assert_eq!(ids, vec!["local", "east", "west"]);

        let local_only = service_on(&[]);
        assert_eq!(registry.list_candidates(&local_only).len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_numbers() {
        let source = Arc::new(FakeSnapshots::default());
        source.set("west", Ok(info(4000, 2000)));
        let registry = registry(source.clone());

        registry.refresh(&ClusterId::new("west")).await.unwrap();
        let before = registry.snapshot(&ClusterId::new("west")).unwrap();
        assert!(before.reachable);
        assert_eq!(before.free_cpu_millis, 2000);

        source.set("west", Err(SchedError::Transient("down".into())));
        assert!(registry.refresh(&ClusterId::new("west")).await.is_err());

        let after = registry.snapshot(&ClusterId::new("west")).unwrap();
        assert!(!after.reachable);
        assert_eq!(after.free_cpu_millis, 2000);
        assert_eq!(after.last_updated, before.last_updated);
    }

    #[tokio::test]
    async fn test_refresh_all_updates_every_cluster() {
        let source = Arc::new(FakeSnapshots::default());
        source.set("local", Ok(info(8000, 8000)));
        source.set("west", Ok(info(4000, 1000)));
        let registry = registry(source);

        registry.refresh_all().await;

        assert!(registry.snapshot(&ClusterId::local()).unwrap().reachable);
        assert!(registry.snapshot(&ClusterId::new("west")).unwrap().reachable);
        // No answer configured for east
        assert!(!registry.snapshot(&ClusterId::new("east")).unwrap().reachable);
    }

    #[test]
    fn test_three_failures_open_the_circuit() {
        let registry = registry(Arc::new(FakeSnapshots::default()));
        let west = ClusterId::new("west");
        let service = service_on(&[("west", 0)]);
        let circuit_of = |registry: &ClusterRegistry| {
            registry
                .list_candidates(&service)
                .into_iter()
                .find(|c| c.id == west)
                .map(|c| c.circuit)
        };

        registry.mark_delegation_result(&west, false);
        registry.mark_delegation_result(&west, false);
        assert_eq!(circuit_of(&registry), Some(CircuitState::Closed));

        registry.mark_delegation_result(&west, false);
        assert_eq!(circuit_of(&registry), Some(CircuitState::Open));

        registry.mark_delegation_result(&west, true);
        assert_eq!(circuit_of(&registry), Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn test_half_open_circuit_admits_one_delegation() {
        let registry = ClusterRegistry::new(
            vec![remote("west")],
            Arc::new(FakeSnapshots::default()),
            CircuitConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(50),
            },
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        let west = ClusterId::new("west");
        let service = service_on(&[("west", 0)]);
        let circuit_of = |registry: &ClusterRegistry| {
            registry
                .list_candidates(&service)
                .into_iter()
                .find(|c| c.id == west)
                .map(|c| c.circuit)
        };

        registry.mark_delegation_result(&west, false);
        assert!(!registry.begin_delegation(&west));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(circuit_of(&registry), Some(CircuitState::HalfOpen));

        assert!(registry.begin_delegation(&west));
        assert_eq!(circuit_of(&registry), Some(CircuitState::Open));
        assert!(!registry.begin_delegation(&west));

        registry.mark_delegation_result(&west, true);
        assert_eq!(circuit_of(&registry), Some(CircuitState::Closed));
        assert!(registry.begin_delegation(&west));
        assert!(!registry.begin_delegation(&ClusterId::new("north")));
    }

    #[test]
    fn test_views() {
        let registry = registry(Arc::new(FakeSnapshots::default()))
            .with_local_backend(BackendKind::Knative);
        let views = registry.views();

        assert_eq!(views.len(), 3);
        let local = views.iter().find(|v| v.id.is_local()).unwrap();
        assert_eq!(local.capability, Some(BackendKind::Knative));
        assert!(local.endpoint.is_none());
        assert!(!local.fresh);
    }
}
