//! Job DTOs for inter-service communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{ExecutionPhase, Job};

/// Header marking a submission as delegated by another control plane
pub const DELEGATED_HEADER: &str = "x-stratus-delegated";

/// Acknowledgment of an asynchronous admission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmitResponse {
    pub job_id: Uuid,
}

/// Job record together with its observed execution phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetails {
    pub job: Job,
    /// `None` when the job is not assigned or the phase could not be read
    pub phase: Option<ExecutionPhase>,
}

/// Jobs removed by a per-service bulk delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedJobs {
    pub deleted: Vec<Uuid>,
}
