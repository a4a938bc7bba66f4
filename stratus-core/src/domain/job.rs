//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::cluster::ClusterId;

/// One invocation attempt of a service
///
/// Created at admission, mutated only by initial assignment and by
/// rescheduling, destroyed when explicitly deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub service: String,
    /// Opaque invocation payload (request body or storage event)
    pub payload: String,
    pub state: JobState,
    /// Id the job was admitted under on a remote cluster
    pub remote_job_id: Option<Uuid>,
    /// Admitted on behalf of another control plane: runs locally, never moves
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of delegation attempts made so far
    pub attempts: u32,
    /// Every cluster a delegation was attempted on, in order
    pub attempted_clusters: Vec<ClusterId>,
}

/// Job state machine
///
/// `Pending -> Assigned -> {Completed | Failed}`, or `Pending -> Failed`
/// when delegation exhausts every candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Assigned { cluster: ClusterId },
    Completed,
    Failed { reason: FailureReason },
}

/// Why a job failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Every eligible candidate was exhausted
    NoCapacity,
    /// A cluster refused the job with a non-retryable error
    Rejected { message: String },
    /// The execution itself failed on the assigned cluster
    ExecutionFailed,
}

/// Execution progress as observed on the cluster a job is assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// Accepted but not started (e.g. pods unschedulable)
    Pending,
    Running,
    Succeeded,
    Failed,
    /// The cluster has no record of the execution
    Missing,
}

impl Job {
    /// Creates a new pending job for `service`
    pub fn new(service: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.into(),
            payload: payload.into(),
            state: JobState::Pending,
            remote_job_id: None,
            pinned: false,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            finished_at: None,
            attempts: 0,
            attempted_clusters: Vec::new(),
        }
    }

    /// Cluster currently authoritative for this job
    pub fn assigned_cluster(&self) -> Option<&ClusterId> {
        match &self.state {
            JobState::Assigned { cluster } => Some(cluster),
            _ => None,
        }
    }

    /// Cluster the job runs or last ran on
    ///
    /// Finished jobs keep pointing at the cluster of their last assignment,
    /// so their execution can still be read and cleaned up.
    pub fn execution_cluster(&self) -> Option<&ClusterId> {
        match &self.state {
            JobState::Assigned { cluster } => Some(cluster),
            JobState::Pending => None,
            _ if self.assigned_at.is_some() => self.attempted_clusters.last(),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, JobState::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Completed | JobState::Failed { .. })
    }

    pub fn has_attempted(&self, cluster: &ClusterId) -> bool {
        self.attempted_clusters.contains(cluster)
    }

    /// Reference point of the rescheduling grace period
    pub fn grace_anchor(&self) -> DateTime<Utc> {
        self.assigned_at.unwrap_or(self.created_at)
    }

    /// Kubernetes object name of the local execution
    ///
    /// Service names are capped so this stays within the 63 character limit.
    pub fn execution_name(&self) -> String {
        let id = self.id.simple().to_string();
        format!("{}-{}", self.service, &id[..8])
    }
}

impl ExecutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionPhase::Succeeded | ExecutionPhase::Failed)
    }

    /// Whether the execution never got going on its cluster
    pub fn is_stuck(&self) -> bool {
        matches!(self, ExecutionPhase::Pending | ExecutionPhase::Missing)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "Pending"),
            JobState::Assigned { cluster } => write!(f, "Assigned({})", cluster),
            JobState::Completed => write!(f, "Completed"),
            JobState::Failed { reason } => write!(f, "Failed({})", reason),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NoCapacity => write!(f, "NoCapacity"),
            FailureReason::Rejected { message } => write!(f, "Rejected: {}", message),
            FailureReason::ExecutionFailed => write!(f, "ExecutionFailed"),
        }
    }
}
