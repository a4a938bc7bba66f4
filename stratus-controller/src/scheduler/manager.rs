//! Resource Manager: assigns each job to exactly one cluster
//!
//! Delegation of one job is strictly sequential: candidates are tried one
//! at a time, best first, each bounded by the delegation timeout. The job
//! is leased for the whole run so no other worker touches it.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use stratus_core::domain::cluster::ClusterId;
use stratus_core::domain::job::{ExecutionPhase, FailureReason, Job, JobState};
use stratus_core::domain::service::Service;
use uuid::Uuid;

use super::placement::Placement;
use super::scoring;
use crate::config::SchedulingConfig;
use crate::error::{Result, SchedError};
use crate::registry::{ClusterRegistry, to_chrono};
use crate::store::JobStore;

pub struct ResourceManager {
    registry: Arc<ClusterRegistry>,
    store: Arc<dyn JobStore>,
    placement: Arc<dyn Placement>,
    config: SchedulingConfig,
}

impl ResourceManager {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        store: Arc<dyn JobStore>,
        placement: Arc<dyn Placement>,
        config: SchedulingConfig,
    ) -> Self {
        Self {
            registry,
            store,
            placement,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    pub fn placement(&self) -> &Arc<dyn Placement> {
        &self.placement
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    /// Bounds a placement call by the delegation timeout
    pub(crate) async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.delegation_timeout, call).await?
    }

    /// Records a new job and delegates it
    pub async fn admit(&self, service: &Service, job: Job) -> Result<Job> {
        let id = job.id;
        self.store.insert(job).await?;
        self.delegate(service, id).await
    }

    /// Runs delegation for a pending job
    pub async fn delegate(&self, service: &Service, id: Uuid) -> Result<Job> {
        if !self.store.try_lease(id).await? {
            return Err(SchedError::Conflict(format!("job {} is being scheduled", id)));
        }

        let result = self.delegate_leased(service, id).await;

        if let Err(e) = self.store.release(id).await {
            tracing::warn!(job_id = %id, error = %e, "Failed to release job lease");
        }
        result
    }

    /// Delegation proper; the caller holds the job's lease
    pub(crate) async fn delegate_leased(&self, service: &Service, id: Uuid) -> Result<Job> {
        let job = self.store.get(id).await?;
        if !job.is_pending() {
            return Err(SchedError::Conflict(format!(
                "job {} is {}, not pending",
                id, job.state
            )));
        }

        if job.pinned {
            return self.place_pinned(service, job).await;
        }

        let freshness = to_chrono(self.registry.freshness());
        let mut job = job;
        // Half-open clusters whose single trial another delegation holds
        let mut busy: Vec<ClusterId> = Vec::new();

        loop {
            if job.attempts >= self.config.max_delegation_attempts {
                tracing::warn!(job_id = %id, attempts = job.attempts, "Delegation attempts exhausted");
                return self.fail_no_capacity(&job).await;
            }

            let excluded: Vec<ClusterId> = job
                .attempted_clusters
                .iter()
                .chain(&busy)
                .cloned()
                .collect();
            let in_flight = self.store.in_flight_by_cluster().await?;
            let ranked = scoring::rank(
                self.registry.list_candidates(service),
                service,
                &excluded,
                &in_flight,
                &self.config.weights,
                Utc::now(),
                freshness,
            );

            let Some(best) = ranked.into_iter().next() else {
                tracing::warn!(job_id = %id, service = %service.name, "No candidate cluster left");
                return self.fail_no_capacity(&job).await;
            };
            let cluster = best.candidate.id;

            if !self.registry.begin_delegation(&cluster) {
                tracing::debug!(job_id = %id, cluster = %cluster, "Circuit trial already in flight");
                busy.push(cluster);
                continue;
            }

            job = self.store.record_attempt(id, &cluster).await?;
            tracing::debug!(job_id = %id, cluster = %cluster, score = best.score, fresh = best.fresh, attempt = job.attempts, "Delegating job");

            let submitted = tokio::time::timeout(
                self.config.delegation_timeout,
                self.placement.submit(&cluster, service, &job),
            )
            .await;

            match submitted {
                Ok(Ok(remote_job_id)) => {
                    self.registry.mark_delegation_result(&cluster, true);
                    let job = self.store.assign(id, &cluster, remote_job_id).await?;
                    tracing::info!(job_id = %id, cluster = %cluster, "Job assigned");
                    return Ok(job);
                }
                Ok(Err(e)) if e.is_retryable() => {
                    self.registry.mark_delegation_result(&cluster, false);
                    tracing::warn!(job_id = %id, cluster = %cluster, error = %e, "Delegation attempt failed");
                }
                Ok(Err(e)) => {
                    tracing::warn!(job_id = %id, cluster = %cluster, error = %e, "Delegation rejected");
                    self.fail(&job, FailureReason::Rejected { message: e.to_string() })
                        .await?;
                    return Err(e);
                }
                Err(_) => {
                    self.registry.mark_delegation_result(&cluster, false);
                    tracing::warn!(job_id = %id, cluster = %cluster, "Delegation attempt timed out");
                    // The create may still land; make sure it does not linger
                    self.discard_late_submission(&cluster, &job).await;
                }
            }
        }
    }

    /// A job delegated to us by another control plane runs here or nowhere
    async fn place_pinned(&self, service: &Service, job: Job) -> Result<Job> {
        let local = ClusterId::local();
        let job = self.store.record_attempt(job.id, &local).await?;

        match self.bounded(self.placement.submit(&local, service, &job)).await {
            Ok(_) => {
                let job = self.store.assign(job.id, &local, None).await?;
                tracing::info!(job_id = %job.id, "Delegated job accepted");
                Ok(job)
            }
            Err(e) => {
                self.fail(&job, FailureReason::Rejected { message: e.to_string() })
                    .await?;
                Err(e)
            }
        }
    }

    async fn discard_late_submission(&self, cluster: &ClusterId, job: &Job) {
        match self.bounded(self.placement.withdraw(cluster, job)).await {
            Ok(()) => tracing::debug!(job_id = %job.id, cluster = %cluster, "Withdrew late submission"),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::warn!(job_id = %job.id, cluster = %cluster, error = %e, "Could not withdraw timed-out submission")
            }
        }
    }

    async fn fail(&self, job: &Job, reason: FailureReason) -> Result<Job> {
        Ok(self.store.finish(job.id, JobState::Failed { reason }).await?)
    }

    async fn fail_no_capacity(&self, job: &Job) -> Result<Job> {
        self.fail(job, FailureReason::NoCapacity).await?;
        Err(SchedError::NoCapacity(format!(
            "no cluster could take job {} of service {} after {} attempts",
            job.id, job.service, job.attempts
        )))
    }

    /// Observed execution phase of an assigned job
    pub async fn phase(&self, job: &Job) -> Option<ExecutionPhase> {
        let cluster = job.assigned_cluster()?;
        match self.bounded(self.placement.phase(cluster, job)).await {
            Ok(phase) => Some(phase),
            Err(e) => {
                tracing::debug!(job_id = %job.id, cluster = %cluster, error = %e, "Phase unavailable");
                None
            }
        }
    }

    /// Output of a job's execution on the cluster it runs or ran on
    pub async fn logs(&self, id: Uuid) -> Result<String> {
        let job = self.store.get(id).await?;
        let Some(cluster) = job.execution_cluster() else {
            return Err(SchedError::NotFound(format!("job {} has not been placed", id)));
        };
        self.bounded(self.placement.logs(cluster, &job)).await
    }

    /// Withdraws a job's execution and deletes its record
    ///
    /// Finished jobs are withdrawn too, which removes what their execution
    /// left on the cluster.
    pub async fn remove(&self, id: Uuid) -> Result<Job> {
        let job = self.store.get(id).await?;
        if let Some(cluster) = job.execution_cluster() {
            match self.bounded(self.placement.withdraw(cluster, &job)).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        let job = self.store.delete(id).await?;
        tracing::info!(job_id = %id, "Job deleted");
        Ok(job)
    }

    /// Removes the finished jobs of `service`, or every one with `all`
    ///
    /// A job that cannot be withdrawn is kept and logged; the others are
    /// still removed.
    pub async fn remove_service_jobs(&self, service: &str, all: bool) -> Result<Vec<Uuid>> {
        let jobs = self.store.list(Some(service)).await?;
        let mut deleted = Vec::new();

        for job in jobs.into_iter().filter(|job| all || job.is_terminal()) {
            match self.remove(job.id).await {
                Ok(_) => deleted.push(job.id),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Job kept, withdrawal failed");
                }
            }
        }

        tracing::info!(service = %service, deleted = deleted.len(), "Service jobs deleted");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitConfig;
    use crate::store::MemoryJobStore;
    use crate::testing::{
        FakePlacement, FakeSnapshots, fresh_registry, info, registry_tuned, registry_with, service_on,
    };
    use std::time::Duration;

    fn manager(registry: Arc<ClusterRegistry>, placement: Arc<FakePlacement>) -> ResourceManager {
        ResourceManager::new(
            registry,
            Arc::new(MemoryJobStore::new()),
            placement,
            SchedulingConfig {
                delegation_timeout: Duration::from_millis(200),
                ..SchedulingConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_prefers_local_when_it_fits() {
        let registry = fresh_registry(&[("local", 8), ("west", 8)]).await;
        let placement = Arc::new(FakePlacement::default());
        let manager = manager(registry, placement.clone());
        let service = service_on(&[("west", 0)]);

        let job = manager.admit(&service, Job::new("svc", "")).await.unwrap();
        assert_eq!(job.assigned_cluster(), Some(&ClusterId::local()));
        assert_eq!(placement.submitted(), vec![ClusterId::local()]);
    }

    #[tokio::test]
    async fn test_transient_failure_moves_to_next_candidate() {
        let registry = fresh_registry(&[("local", 8), ("west", 6), ("east", 4)]).await;
        let placement = Arc::new(FakePlacement::default());
        placement.fail_on("local", SchedError::Transient("refused".into()));
        placement.fail_on("west", SchedError::Transient("refused".into()));
        let manager = manager(registry, placement.clone());
        let service = service_on(&[("west", 0), ("east", 0)]);

        let job = manager.admit(&service, Job::new("svc", "")).await.unwrap();
        assert_eq!(job.assigned_cluster(), Some(&ClusterId::new("east")));
        assert_eq!(job.attempts, 3);
        assert_eq!(
            job.attempted_clusters,
            vec![ClusterId::local(), ClusterId::new("west"), ClusterId::new("east")]
        );
        assert_eq!(job.remote_job_id, Some(placement.remote_id()));
    }

    #[tokio::test]
    async fn test_exhaustion_fails_with_no_capacity() {
        let registry = fresh_registry(&[("local", 8), ("west", 6)]).await;
        let placement = Arc::new(FakePlacement::default());
        placement.fail_on("local", SchedError::Transient("refused".into()));
        placement.fail_on("west", SchedError::Transient("refused".into()));
        let manager = manager(registry, placement);
        let service = service_on(&[("west", 0)]);

        let job = Job::new("svc", "");
        let id = job.id;
        let err = manager.admit(&service, job).await.unwrap_err();
        assert!(matches!(err, SchedError::NoCapacity(_)));

        let stored = manager.store().get(id).await.unwrap();
        assert_eq!(
            stored.state,
            JobState::Failed {
                reason: FailureReason::NoCapacity
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_remotes_are_never_called() {
        let source = Arc::new(FakeSnapshots::default());
        source.set("local", Ok(info(10_000, 0)));
        source.set("west", Ok(info(10_000, 8_000)));
        source.set("east", Ok(info(10_000, 8_000)));
        let registry = registry_with(source.clone(), &["west", "east"]);
        registry.refresh_all().await;

        source.set("west", Err(SchedError::Transient("unreachable".into())));
        source.set("east", Err(SchedError::Transient("unreachable".into())));
        registry.refresh_all().await;

        let placement = Arc::new(FakePlacement::default());
        let manager = manager(registry, placement.clone());
        let service = service_on(&[("west", 0), ("east", 0)]);

        let err = manager.admit(&service, Job::new("svc", "")).await.unwrap_err();
        assert!(matches!(err, SchedError::NoCapacity(_)));
        assert!(placement.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let registry = fresh_registry(&[("local", 8), ("west", 6)]).await;
        let placement = Arc::new(FakePlacement::default());
        placement.fail_on("local", SchedError::InvalidSpec("bad image".into()));
        let manager = manager(registry, placement.clone());
        let service = service_on(&[("west", 0)]);

        let err = manager.admit(&service, Job::new("svc", "")).await.unwrap_err();
        assert!(matches!(err, SchedError::InvalidSpec(_)));
        assert_eq!(placement.submitted(), vec![ClusterId::local()]);
    }

    #[tokio::test]
    async fn test_slow_cluster_counts_as_failed_attempt() {
        let registry = fresh_registry(&[("local", 8), ("west", 6)]).await;
        let placement = Arc::new(FakePlacement::default());
        placement.delay_on("local", Duration::from_secs(5));
        let manager = manager(registry, placement.clone());
        let service = service_on(&[("west", 0)]);

        let job = manager.admit(&service, Job::new("svc", "")).await.unwrap();
        assert_eq!(job.assigned_cluster(), Some(&ClusterId::new("west")));
        assert_eq!(placement.withdrawn(), vec![ClusterId::local()]);
    }

    #[tokio::test]
    async fn test_repeated_failures_open_the_circuit() {
        let registry = fresh_registry(&[("local", 0), ("west", 8), ("east", 4)]).await;
        let placement = Arc::new(FakePlacement::default());
        placement.fail_on("west", SchedError::Transient("refused".into()));
        let manager = manager(registry.clone(), placement.clone());
        let service = service_on(&[("west", 0), ("east", 0)]);

        for _ in 0..3 {
            let job = manager.admit(&service, Job::new("svc", "")).await.unwrap();
            assert_eq!(job.assigned_cluster(), Some(&ClusterId::new("east")));
        }
        assert_eq!(placement.submitted_to("west"), 3);

        // West is now excluded without being called
        let job = manager.admit(&service, Job::new("svc", "")).await.unwrap();
        assert_eq!(job.attempted_clusters, vec![ClusterId::new("east")]);
        assert_eq!(placement.submitted_to("west"), 3);
    }

    #[tokio::test]
    async fn test_pinned_job_only_runs_locally() {
        let registry = fresh_registry(&[("local", 0), ("west", 8)]).await;
        let placement = Arc::new(FakePlacement::default());
        let manager = manager(registry, placement.clone());
        let service = service_on(&[("west", 0)]);

        let mut job = Job::new("svc", "");
        job.pinned = true;
        let job = manager.admit(&service, job).await.unwrap();
        assert_eq!(job.assigned_cluster(), Some(&ClusterId::local()));
        assert_eq!(placement.submitted(), vec![ClusterId::local()]);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_assign_each_job_once() {
        let registry = fresh_registry(&[("local", 8), ("west", 8), ("east", 8)]).await;
        let placement = Arc::new(FakePlacement::default());
        placement.fail_on("local", SchedError::Transient("busy".into()));
        let manager = Arc::new(manager(registry, placement.clone()));
        let service = service_on(&[("west", 0), ("east", 0)]);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                manager.admit(&service, Job::new("svc", "")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().ok();
        }

        for job in manager.store().list(None).await.unwrap() {
            let mut seen = job.attempted_clusters.clone();
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), job.attempted_clusters.len());

            let successes = placement.successes_for(job.id);
            assert!(successes <= 1, "job {} placed {} times", job.id, successes);
            if job.assigned_cluster().is_some() {
                assert_eq!(successes, 1);
            }
        }
    }

    #[tokio::test]
    async fn test_delegate_refuses_leased_job() {
        let registry = fresh_registry(&[("local", 8)]).await;
        let manager = manager(registry, Arc::new(FakePlacement::default()));
        let service = service_on(&[]);

        let job = Job::new("svc", "");
        manager.store().insert(job.clone()).await.unwrap();
        manager.store().try_lease(job.id).await.unwrap();

        let err = manager.delegate(&service, job.id).await.unwrap_err();
        assert!(matches!(err, SchedError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_remove_withdraws_assigned_job() {
        let registry = fresh_registry(&[("local", 8)]).await;
        let placement = Arc::new(FakePlacement::default());
        let manager = manager(registry, placement.clone());

        let job = manager.admit(&service_on(&[]), Job::new("svc", "")).await.unwrap();
        manager.remove(job.id).await.unwrap();

        assert_eq!(placement.withdrawn(), vec![ClusterId::local()]);
        assert!(manager.store().get(job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_admission_outlives_snapshot_freshness() {
        let source = Arc::new(FakeSnapshots::default());
        source.set("local", Ok(info(10_000, 8_000)));
        let registry = registry_tuned(
            source,
            &[],
            CircuitConfig::default(),
            Duration::from_millis(100),
        );
        registry.refresh_all().await;
        let placement = Arc::new(FakePlacement::default());
        let manager = manager(registry, placement.clone());
        let service = service_on(&[]);

        manager.admit(&service, Job::new("svc", "")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Nothing refreshed the snapshot in between
        let job = manager.admit(&service, Job::new("svc", "")).await.unwrap();
        assert_eq!(job.assigned_cluster(), Some(&ClusterId::local()));
        assert_eq!(placement.submitted_to("local"), 2);
    }

    #[tokio::test]
    async fn test_fresh_cluster_is_tried_before_stale_one() {
        let source = Arc::new(FakeSnapshots::default());
        source.set("local", Ok(info(10_000, 8_000)));
        source.set("west", Ok(info(10_000, 2_000)));
        let registry = registry_tuned(
            source.clone(),
            &["west"],
            CircuitConfig::default(),
            Duration::from_millis(100),
        );
        registry.refresh_all().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        registry.refresh(&ClusterId::new("west")).await.unwrap();

        let placement = Arc::new(FakePlacement::default());
        let manager = manager(registry, placement.clone());
        let job = manager
            .admit(&service_on(&[("west", 0)]), Job::new("svc", ""))
            .await
            .unwrap();
        assert_eq!(job.assigned_cluster(), Some(&ClusterId::new("west")));
    }

    #[tokio::test]
    async fn test_half_open_cluster_takes_one_trial_at_a_time() {
        let source = Arc::new(FakeSnapshots::default());
        source.set("local", Ok(info(10_000, 0)));
        source.set("west", Ok(info(10_000, 8_000)));
        source.set("east", Ok(info(10_000, 4_000)));
        let registry = registry_tuned(
            source,
            &["west", "east"],
            CircuitConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(100),
            },
            Duration::from_secs(60),
        );
        registry.refresh_all().await;
        registry.mark_delegation_result(&ClusterId::new("west"), false);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let placement = Arc::new(FakePlacement::default());
        placement.delay_on("west", Duration::from_millis(100));
        let manager = Arc::new(manager(registry, placement.clone()));
        let service = service_on(&[("west", 0), ("east", 0)]);

        let first = {
            let manager = manager.clone();
            let service = service.clone();
            tokio::spawn(async move { manager.admit(&service, Job::new("svc", "")).await })
        };
        let second = {
            let manager = manager.clone();
            let service = service.clone();
            tokio::spawn(async move { manager.admit(&service, Job::new("svc", "")).await })
        };
        let mut clusters = vec![
            first.await.unwrap().unwrap().assigned_cluster().cloned().unwrap(),
            second.await.unwrap().unwrap().assigned_cluster().cloned().unwrap(),
        ];
        clusters.sort();

        assert_eq!(placement.submitted_to("west"), 1);
        assert_eq!(clusters, vec![ClusterId::new("east"), ClusterId::new("west")]);
    }

    #[tokio::test]
    async fn test_logs_follow_the_execution_cluster() {
        let registry = fresh_registry(&[("local", 0), ("west", 8)]).await;
        let manager = manager(registry, Arc::new(FakePlacement::default()));

        let job = manager
            .admit(&service_on(&[("west", 0)]), Job::new("svc", ""))
            .await
            .unwrap();
        manager.store().finish(job.id, JobState::Completed).await.unwrap();

        let logs = manager.logs(job.id).await.unwrap();
        assert_eq!(logs, format!("{} ran on west\n", job.id));

        let pending = Job::new("svc", "");
        manager.store().insert(pending.clone()).await.unwrap();
        assert!(manager.logs(pending.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_remove_service_jobs() {
        let registry = fresh_registry(&[("local", 8)]).await;
        let placement = Arc::new(FakePlacement::default());
        let manager = manager(registry, placement.clone());
        let service = service_on(&[]);

        let running = manager.admit(&service, Job::new("svc", "")).await.unwrap();
        let done = manager.admit(&service, Job::new("svc", "")).await.unwrap();
        manager.store().finish(done.id, JobState::Completed).await.unwrap();
        let other = manager.admit(&service, Job::new("other", "")).await.unwrap();

        let deleted = manager.remove_service_jobs("svc", false).await.unwrap();
        assert_eq!(deleted, vec![done.id]);
        // The finished execution is cleaned up as well
        assert_eq!(placement.withdrawn(), vec![ClusterId::local()]);

        let deleted = manager.remove_service_jobs("svc", true).await.unwrap();
        assert_eq!(deleted, vec![running.id]);
        assert!(manager.store().get(other.id).await.is_ok());
    }
}
