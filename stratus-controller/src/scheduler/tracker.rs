//! JobTracker: follows assigned jobs to completion
//!
//! Every interval, each assigned job's execution phase is read from its
//! cluster and terminal phases are recorded, so finished work stops
//! counting as in flight. Finished jobs are removed once the retention
//! window has passed, together with what their execution left behind.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use stratus_core::domain::job::{ExecutionPhase, FailureReason, JobState};
use tokio::sync::watch;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::manager::ResourceManager;
use crate::error::Result;
use crate::registry::to_chrono;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackStats {
    pub inspected: usize,
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
    pub purged: usize,
}

/// What one observation did to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    Unchanged,
    Started,
    Completed,
    Failed,
}

pub struct JobTracker {
    manager: Arc<ResourceManager>,
    interval: Duration,
    retention: Duration,
}

impl JobTracker {
    pub fn new(manager: Arc<ResourceManager>, interval: Duration, retention: Duration) -> Self {
        Self {
            manager,
            interval,
            retention,
        }
    }

    /// Run until shutdown is signaled
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_secs = self.retention.as_secs(),
            "Starting job tracker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(stats) if stats.completed + stats.failed + stats.purged > 0 => {
                            info!(
                                inspected = stats.inspected,
                                completed = stats.completed,
                                failed = stats.failed,
                                purged = stats.purged,
                                "Tracking cycle complete"
                            );
                        }
                        Ok(stats) => tracing::debug!(inspected = stats.inspected, "Tracking cycle complete"),
                        Err(e) => error!(error = %e, "Tracking cycle failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Job tracker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over every assigned job, then over expired finished ones
    pub async fn run_once(&self) -> Result<TrackStats> {
        let store = self.manager.store();
        let assigned = store.assigned().await?;

        let mut stats = TrackStats {
            inspected: assigned.len(),
            ..TrackStats::default()
        };

        for job in assigned {
            match self.observe(job.id).await {
                Ok(Observed::Started) => stats.started += 1,
                Ok(Observed::Completed) => stats.completed += 1,
                Ok(Observed::Failed) => stats.failed += 1,
                Ok(Observed::Unchanged) => {}
                Err(e) => tracing::debug!(job_id = %job.id, error = %e, "Job phase unavailable"),
            }
        }

        let cutoff = Utc::now() - to_chrono(self.retention);
        for job in store.finished_before(cutoff).await? {
            match self.manager.remove(job.id).await {
                Ok(_) => stats.purged += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Expired job kept"),
            }
        }

        Ok(stats)
    }

    async fn observe(&self, id: Uuid) -> Result<Observed> {
        let store = self.manager.store();
        if !store.try_lease(id).await? {
            return Ok(Observed::Unchanged);
        }

        let result = self.observe_leased(id).await;

        if let Err(e) = store.release(id).await {
            tracing::warn!(job_id = %id, error = %e, "Failed to release job lease");
        }
        result
    }

    async fn observe_leased(&self, id: Uuid) -> Result<Observed> {
        let store = self.manager.store();
        let job = store.get(id).await?;
        let Some(cluster) = job.assigned_cluster() else {
            return Ok(Observed::Unchanged);
        };

        let phase = self
            .manager
            .bounded(self.manager.placement().phase(cluster, &job))
            .await?;

        match phase {
            ExecutionPhase::Running if job.started_at.is_none() => {
                store.mark_started(id).await?;
                Ok(Observed::Started)
            }
            ExecutionPhase::Succeeded => {
                store.finish(id, JobState::Completed).await?;
                tracing::info!(job_id = %id, cluster = %cluster, "Job completed");
                Ok(Observed::Completed)
            }
            ExecutionPhase::Failed => {
                self.fail(id).await?;
                tracing::info!(job_id = %id, cluster = %cluster, "Job execution failed");
                Ok(Observed::Failed)
            }
            // Gone after it started: nothing will ever finish it
            ExecutionPhase::Missing if job.started_at.is_some() => {
                self.fail(id).await?;
                tracing::warn!(job_id = %id, cluster = %cluster, "Started job vanished from its cluster");
                Ok(Observed::Failed)
            }
            // Never-started jobs are the rescheduler's
            _ => Ok(Observed::Unchanged),
        }
    }

    async fn fail(&self, id: Uuid) -> Result<()> {
        self.manager
            .store()
            .finish(
                id,
                JobState::Failed {
                    reason: FailureReason::ExecutionFailed,
                },
            )
            .await?;
        Ok(())
    }
}
