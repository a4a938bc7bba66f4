//! Fakes and fixtures shared by unit tests

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stratus_core::domain::cluster::{
    BackendKind, ClusterDescriptor, ClusterId, ResourceSnapshot,
};
use stratus_core::domain::job::{ExecutionPhase, Job};
use stratus_core::domain::service::{ClusterEligibility, Service};
use stratus_core::dto::cluster::{CircuitState, ClusterInfo};
use uuid::Uuid;

use crate::backend::{JobRunner, ServerlessBackend, SyncBackend};
use crate::config::CircuitConfig;
use crate::error::{Result, SchedError};
use crate::registry::{Candidate, ClusterRegistry, SnapshotSource};
use crate::scheduler::Placement;

const GIB: u64 = 1024 * 1024 * 1024;

pub fn info(total_cpu_millis: u64, free_cpu_millis: u64) -> ClusterInfo {
    ClusterInfo {
        name: "test".to_string(),
        backend: Some(BackendKind::Kube),
        nodes: 1,
        total_cpu_millis,
        free_cpu_millis,
        total_memory_bytes: 8 * GIB,
        free_memory_bytes: 8 * GIB,
        total_gpu: 0,
        free_gpu: 0,
    }
}

/// Service `svc` eligible for the given (cluster, priority) pairs
pub fn service_on(clusters: &[(&str, u32)]) -> Service {
    Service {
        name: "svc".to_string(),
        image: "ghcr.io/example/svc".to_string(),
        script: "echo $EVENT".to_string(),
        resources: Default::default(),
        clusters: clusters
            .iter()
            .map(|(id, priority)| ClusterEligibility {
                id: ClusterId::new(*id),
                priority: *priority,
            })
            .collect(),
        input: Vec::new(),
        output: Vec::new(),
        synchronous: false,
        environment: HashMap::new(),
    }
}

/// Fresh, reachable candidate with `free_cores` of 10 cores free
pub fn candidate(id: &str, free_cores: u64) -> Candidate {
    Candidate {
        id: ClusterId::new(id),
        priority: 0,
        snapshot: ResourceSnapshot {
            total_cpu_millis: 10_000,
            free_cpu_millis: free_cores * 1000,
            total_memory_bytes: 8 * GIB,
            free_memory_bytes: 4 * GIB,
            total_gpu: 0,
            free_gpu: 0,
            last_updated: Some(Utc::now()),
            reachable: true,
        },
        circuit: CircuitState::Closed,
    }
}

#[derive(Default)]
pub struct FakeSnapshots {
    answers: Mutex<HashMap<String, Result<ClusterInfo>>>,
}

impl FakeSnapshots {
    pub fn set(&self, cluster: &str, answer: Result<ClusterInfo>) {
        self.answers
            .lock()
            .unwrap()
            .insert(cluster.to_string(), answer);
    }
}

#[async_trait]
impl SnapshotSource for FakeSnapshots {
    async fn fetch(&self, cluster: &ClusterId) -> Result<ClusterInfo> {
        self.answers
            .lock()
            .unwrap()
            .get(cluster.as_str())
            .cloned()
            .unwrap_or_else(|| Err(SchedError::Transient(format!("{} did not answer", cluster))))
    }
}

fn descriptor(id: &str) -> ClusterDescriptor {
    ClusterDescriptor {
        id: ClusterId::new(id),
        endpoint: format!("http://{}.example:8080", id),
        auth_user: String::new(),
        auth_password: String::new(),
        capability: BackendKind::Kube,
    }
}

pub fn registry_with(source: Arc<FakeSnapshots>, remotes: &[&str]) -> Arc<ClusterRegistry> {
    registry_tuned(source, remotes, CircuitConfig::default(), Duration::from_secs(60))
}

/// Registry with explicit circuit settings and snapshot freshness
pub fn registry_tuned(
    source: Arc<FakeSnapshots>,
    remotes: &[&str],
    circuit: CircuitConfig,
    freshness: Duration,
) -> Arc<ClusterRegistry> {
    Arc::new(ClusterRegistry::new(
        remotes.iter().map(|id| descriptor(id)).collect(),
        source,
        circuit,
        freshness,
        Duration::from_secs(1),
    ))
}

/// Registry whose clusters were just refreshed with `free_cores` of 10
pub async fn fresh_registry(clusters: &[(&str, u64)]) -> Arc<ClusterRegistry> {
    let source = Arc::new(FakeSnapshots::default());
    for (id, free_cores) in clusters {
        source.set(id, Ok(info(10_000, free_cores * 1000)));
    }
    let remotes: Vec<&str> = clusters
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| *id != "local")
        .collect();

    let registry = registry_with(source, &remotes);
    registry.refresh_all().await;
    registry
}

#[derive(Debug, Clone)]
struct Submission {
    cluster: ClusterId,
    job: Uuid,
    succeeded: bool,
}

/// Placement recording every call, with scripted failures
#[derive(Default)]
pub struct FakePlacement {
    submissions: Mutex<Vec<Submission>>,
    withdrawals: Mutex<Vec<ClusterId>>,
    failures: Mutex<HashMap<String, SchedError>>,
    withdraw_failures: Mutex<HashMap<String, SchedError>>,
    delays: Mutex<HashMap<String, Duration>>,
    phases: Mutex<HashMap<String, ExecutionPhase>>,
}

impl FakePlacement {
    pub fn fail_on(&self, cluster: &str, err: SchedError) {
        self.failures.lock().unwrap().insert(cluster.to_string(), err);
    }

    pub fn fail_withdraw_on(&self, cluster: &str, err: SchedError) {
        self.withdraw_failures
            .lock()
            .unwrap()
            .insert(cluster.to_string(), err);
    }

    pub fn delay_on(&self, cluster: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(cluster.to_string(), delay);
    }

    pub fn set_phase(&self, cluster: &str, phase: ExecutionPhase) {
        self.phases.lock().unwrap().insert(cluster.to_string(), phase);
    }

    /// Id every remote submission is given
    pub fn remote_id(&self) -> Uuid {
        Uuid::from_u128(42)
    }

    /// Clusters of every submission attempt, in order
    pub fn submitted(&self) -> Vec<ClusterId> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.cluster.clone())
            .collect()
    }

    pub fn submitted_to(&self, cluster: &str) -> usize {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.cluster.as_str() == cluster)
            .count()
    }

    pub fn successes_for(&self, job: Uuid) -> usize {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.job == job && s.succeeded)
            .count()
    }

    pub fn withdrawn(&self) -> Vec<ClusterId> {
        self.withdrawals.lock().unwrap().clone()
    }
}

#[async_trait]
impl Placement for FakePlacement {
    async fn submit(
        &self,
        cluster: &ClusterId,
        _service: &Service,
        job: &Job,
    ) -> Result<Option<Uuid>> {
        let index = {
            let mut submissions = self.submissions.lock().unwrap();
            submissions.push(Submission {
                cluster: cluster.clone(),
                job: job.id,
                succeeded: false,
            });
            submissions.len() - 1
        };

        let delay = self.delays.lock().unwrap().get(cluster.as_str()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().get(cluster.as_str()) {
            return Err(err.clone());
        }

        self.submissions.lock().unwrap()[index].succeeded = true;
        Ok((!cluster.is_local()).then(|| self.remote_id()))
    }

    async fn withdraw(&self, cluster: &ClusterId, _job: &Job) -> Result<()> {
        if let Some(err) = self.withdraw_failures.lock().unwrap().get(cluster.as_str()) {
            return Err(err.clone());
        }
        self.withdrawals.lock().unwrap().push(cluster.clone());
        Ok(())
    }

    async fn phase(&self, cluster: &ClusterId, _job: &Job) -> Result<ExecutionPhase> {
        Ok(self
            .phases
            .lock()
            .unwrap()
            .get(cluster.as_str())
            .copied()
            .unwrap_or(ExecutionPhase::Running))
    }

    async fn logs(&self, cluster: &ClusterId, job: &Job) -> Result<String> {
        Ok(format!("{} ran on {}\n", job.id, cluster))
    }
}

/// Backend serving a fixed set of services; echoes synchronous calls
pub struct FakeBackend {
    kind: BackendKind,
    services: Mutex<HashMap<String, Service>>,
    invocations: AtomicUsize,
    invoke_failure: Mutex<Option<SchedError>>,
}

impl FakeBackend {
    pub fn with_services(services: Vec<Service>) -> Self {
        Self {
            kind: BackendKind::Kube,
            services: Mutex::new(services.into_iter().map(|s| (s.name.clone(), s)).collect()),
            invocations: AtomicUsize::new(0),
            invoke_failure: Mutex::new(None),
        }
    }

    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn fail_invoke(&self, err: SchedError) {
        *self.invoke_failure.lock().unwrap() = Some(err);
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerlessBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        service.validate().map_err(SchedError::InvalidSpec)?;
        let mut services = self.services.lock().unwrap();
        if services.contains_key(&service.name) {
            return Err(SchedError::Conflict(format!("service {}", service.name)));
        }
        services.insert(service.name.clone(), service.clone());
        Ok(())
    }

    async fn read_service(&self, name: &str) -> Result<Service> {
        self.services
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| SchedError::NotFound(format!("service {}", name)))
    }

    async fn update_service(&self, service: &Service) -> Result<()> {
        service.validate().map_err(SchedError::InvalidSpec)?;
        let mut services = self.services.lock().unwrap();
        match services.get_mut(&service.name) {
            Some(existing) => {
                *existing = service.clone();
                Ok(())
            }
            None => Err(SchedError::NotFound(format!("service {}", service.name))),
        }
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        self.services
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SchedError::NotFound(format!("service {}", name)))
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let mut services: Vec<Service> = self.services.lock().unwrap().values().cloned().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    async fn cluster_info(&self) -> Result<ClusterInfo> {
        Ok(info(8000, 8000))
    }

    fn as_sync(&self) -> Option<&dyn SyncBackend> {
        if self.kind.supports_sync() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl SyncBackend for FakeBackend {
    async fn invoke(&self, _name: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match self.invoke_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(payload),
        }
    }
}

/// Job runner recording submissions
#[derive(Default)]
pub struct FakeRunner {
    pub submitted: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn submit(&self, _service: &Service, job: &Job) -> Result<()> {
        self.submitted.lock().unwrap().push(job.id);
        Ok(())
    }

    async fn withdraw(&self, _job: &Job) -> Result<()> {
        Ok(())
    }

    async fn phase(&self, _job: &Job) -> Result<ExecutionPhase> {
        Ok(ExecutionPhase::Running)
    }

    async fn logs(&self, job: &Job) -> Result<String> {
        Ok(format!("{} ran locally\n", job.id))
    }
}
