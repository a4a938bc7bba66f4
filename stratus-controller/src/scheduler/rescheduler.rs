//! ReScheduler: moves jobs that never started to another cluster
//!
//! A cluster that looked free at admission may have been contended since.
//! Every interval, jobs whose assignment has not started within the grace
//! period are withdrawn from their cluster and delegated again, excluding
//! every cluster already attempted.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use stratus_core::domain::cluster::ClusterId;
use stratus_core::domain::job::{ExecutionPhase, FailureReason, Job, JobState};
use tokio::sync::watch;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::manager::ResourceManager;
use crate::backend::ServerlessBackend;
use crate::error::{Result, SchedError};
use crate::registry::to_chrono;

/// What one reconciliation did to a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Leased elsewhere or no longer stalled
    Skipped,
    Started,
    Finished,
    Moved(ClusterId),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub inspected: usize,
    pub moved: usize,
    pub started: usize,
    pub finished: usize,
    pub failed: usize,
}

pub struct ReScheduler {
    manager: Arc<ResourceManager>,
    services: Arc<dyn ServerlessBackend>,
    interval: Duration,
}

impl ReScheduler {
    pub fn new(
        manager: Arc<ResourceManager>,
        services: Arc<dyn ServerlessBackend>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            services,
            interval,
        }
    }

    /// Run until shutdown is signaled
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            grace_secs = self.manager.config().rescheduler_threshold.as_secs(),
            "Starting rescheduler"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(stats) if stats.moved > 0 || stats.failed > 0 => {
                            info!(
                                inspected = stats.inspected,
                                moved = stats.moved,
                                started = stats.started,
                                finished = stats.finished,
                                failed = stats.failed,
                                "Rescheduling cycle complete"
                            );
                        }
                        Ok(stats) => tracing::debug!(inspected = stats.inspected, "Rescheduling cycle complete"),
                        Err(e) => error!(error = %e, "Rescheduling cycle failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Rescheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over every stalled job
    pub async fn run_once(&self) -> Result<CycleStats> {
        let grace = to_chrono(self.manager.config().rescheduler_threshold);
        let stalled = self.manager.store().stalled(Utc::now() - grace).await?;

        let mut stats = CycleStats {
            inspected: stalled.len(),
            ..CycleStats::default()
        };

        for job in stalled {
            match self.reconcile(job.id).await {
                Ok(Outcome::Moved(_)) => stats.moved += 1,
                Ok(Outcome::Started) => stats.started += 1,
                Ok(Outcome::Finished) => stats.finished += 1,
                Ok(Outcome::Skipped) => {}
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(job_id = %job.id, error = %e, "Rescheduling failed");
                }
            }
        }

        Ok(stats)
    }

    async fn reconcile(&self, id: Uuid) -> Result<Outcome> {
        let store = self.manager.store();
        if !store.try_lease(id).await? {
            return Ok(Outcome::Skipped);
        }

        let result = self.reconcile_leased(id).await;

        if let Err(e) = store.release(id).await {
            tracing::warn!(job_id = %id, error = %e, "Failed to release job lease");
        }
        result
    }

    async fn reconcile_leased(&self, id: Uuid) -> Result<Outcome> {
        let store = self.manager.store();
        let job = store.get(id).await?;
        if job.pinned || job.is_terminal() || job.started_at.is_some() {
            return Ok(Outcome::Skipped);
        }

        if let Some(cluster) = job.assigned_cluster().cloned() {
            match self.manager.bounded(self.placement_phase(&cluster, &job)).await? {
                ExecutionPhase::Running => {
                    store.mark_started(id).await?;
                    return Ok(Outcome::Started);
                }
                ExecutionPhase::Succeeded => {
                    store.finish(id, JobState::Completed).await?;
                    return Ok(Outcome::Finished);
                }
                ExecutionPhase::Failed => {
                    store
                        .finish(
                            id,
                            JobState::Failed {
                                reason: FailureReason::ExecutionFailed,
                            },
                        )
                        .await?;
                    return Ok(Outcome::Finished);
                }
                ExecutionPhase::Pending | ExecutionPhase::Missing => {
                    self.withdraw(&cluster, &job).await?;
                    store.return_to_pending(id).await?;
                    tracing::info!(job_id = %id, cluster = %cluster, "Stalled job withdrawn");
                }
            }
        }

        let service = match self.services.read_service(&job.service).await {
            Ok(service) => service,
            Err(SchedError::NotFound(message)) => {
                store
                    .finish(
                        id,
                        JobState::Failed {
                            reason: FailureReason::Rejected { message },
                        },
                    )
                    .await?;
                return Ok(Outcome::Finished);
            }
            Err(e) => return Err(e),
        };

        let job = self.manager.delegate_leased(&service, id).await?;
        match job.assigned_cluster() {
            Some(cluster) => Ok(Outcome::Moved(cluster.clone())),
            None => Ok(Outcome::Finished),
        }
    }

    async fn placement_phase(&self, cluster: &ClusterId, job: &Job) -> Result<ExecutionPhase> {
        self.manager.placement().phase(cluster, job).await
    }

    /// A missing execution counts as withdrawn
    async fn withdraw(&self, cluster: &ClusterId, job: &Job) -> Result<()> {
        match self
            .manager
            .bounded(self.manager.placement().withdraw(cluster, job))
            .await
        {
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        }
    }
}
