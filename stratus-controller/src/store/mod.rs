//! Job store
//!
//! Every job state transition goes through a [`JobStore`] so that live
//! delegation and the rescheduler observe the same records. Transitions
//! are validated by the store: a job can only be assigned while pending,
//! and a cluster can only be attempted once per job.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use stratus_core::domain::cluster::ClusterId;
use stratus_core::domain::job::{Job, JobState};
use thiserror::Error;
use uuid::Uuid;

use crate::error::SchedError;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} already exists")]
    Duplicate(Uuid),

    #[error("job {id} cannot {action} in state {state}")]
    InvalidTransition {
        id: Uuid,
        action: &'static str,
        state: JobState,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt job record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for SchedError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => SchedError::NotFound(err.to_string()),
            StoreError::Duplicate(_) | StoreError::InvalidTransition { .. } => {
                SchedError::Conflict(err.to_string())
            }
            StoreError::Database(_) | StoreError::Corrupt(_) => {
                tracing::error!(error = %err, "Job store failure");
                SchedError::Internal(err.to_string())
            }
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Job>;

    /// Jobs ordered by creation, optionally for one service
    async fn list(&self, service: Option<&str>) -> StoreResult<Vec<Job>>;

    async fn delete(&self, id: Uuid) -> StoreResult<Job>;

    /// Takes exclusive ownership of a job for a delegation or a
    /// rescheduling pass; `false` when someone else holds it
    async fn try_lease(&self, id: Uuid) -> StoreResult<bool>;

    async fn release(&self, id: Uuid) -> StoreResult<()>;

    /// Counts a delegation attempt on `cluster` for a pending job
    ///
    /// Fails if the cluster was already attempted for this job.
    async fn record_attempt(&self, id: Uuid, cluster: &ClusterId) -> StoreResult<Job>;

    /// `Pending -> Assigned(cluster)`
    async fn assign(
        &self,
        id: Uuid,
        cluster: &ClusterId,
        remote_job_id: Option<Uuid>,
    ) -> StoreResult<Job>;

    /// Records that the execution was observed running
    async fn mark_started(&self, id: Uuid) -> StoreResult<Job>;

    /// Moves a job to `Completed` or `Failed`
    async fn finish(&self, id: Uuid, state: JobState) -> StoreResult<Job>;

    /// `Assigned -> Pending`, after the execution was withdrawn
    async fn return_to_pending(&self, id: Uuid) -> StoreResult<Job>;

    /// Number of assigned, unfinished jobs per cluster
    async fn in_flight_by_cluster(&self) -> StoreResult<HashMap<ClusterId, usize>>;

    /// Unpinned, unleased jobs that have not started and whose last
    /// assignment (or creation) is older than `older_than`
    async fn stalled(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Job>>;

    /// Unleased assigned jobs, oldest assignment first
    async fn assigned(&self) -> StoreResult<Vec<Job>>;

    /// Unleased finished jobs whose `finished_at` is older than `before`
    async fn finished_before(&self, before: DateTime<Utc>) -> StoreResult<Vec<Job>>;
}

/// Shared transitions applied to an in-memory record
pub(crate) mod transitions {
    use super::*;

    fn invalid(job: &Job, action: &'static str) -> StoreError {
        StoreError::InvalidTransition {
            id: job.id,
            action,
            state: job.state.clone(),
        }
    }

    pub fn record_attempt(job: &mut Job, cluster: &ClusterId) -> StoreResult<()> {
        if !job.is_pending() || job.has_attempted(cluster) {
            return Err(invalid(job, "be attempted"));
        }
        job.attempts += 1;
        job.attempted_clusters.push(cluster.clone());
        Ok(())
    }

    pub fn assign(
        job: &mut Job,
        cluster: &ClusterId,
        remote_job_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if !job.is_pending() {
            return Err(invalid(job, "be assigned"));
        }
        job.state = JobState::Assigned {
            cluster: cluster.clone(),
        };
        job.remote_job_id = remote_job_id;
        job.assigned_at = Some(now);
        job.started_at = None;
        Ok(())
    }

    pub fn mark_started(job: &mut Job, now: DateTime<Utc>) -> StoreResult<()> {
        if job.assigned_cluster().is_none() {
            return Err(invalid(job, "start"));
        }
        job.started_at.get_or_insert(now);
        Ok(())
    }

    pub fn finish(job: &mut Job, state: JobState, now: DateTime<Utc>) -> StoreResult<()> {
        if job.is_terminal() || !matches!(state, JobState::Completed | JobState::Failed { .. }) {
            return Err(invalid(job, "finish"));
        }
        job.state = state;
        job.finished_at = Some(now);
        Ok(())
    }

    pub fn return_to_pending(job: &mut Job) -> StoreResult<()> {
        if job.assigned_cluster().is_none() {
            return Err(invalid(job, "return to pending"));
        }
        job.state = JobState::Pending;
        job.remote_job_id = None;
        job.started_at = None;
        Ok(())
    }

    pub fn is_stalled(job: &Job, older_than: DateTime<Utc>) -> bool {
        !job.pinned
            && !job.is_terminal()
            && job.started_at.is_none()
            && job.grace_anchor() < older_than
    }

    pub fn is_expired(job: &Job, before: DateTime<Utc>) -> bool {
        job.is_terminal() && job.finished_at.is_some_and(|at| at < before)
    }
}
