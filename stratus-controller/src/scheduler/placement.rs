//! Placing jobs on a chosen cluster

use async_trait::async_trait;
use std::sync::Arc;
use stratus_core::domain::cluster::ClusterId;
use stratus_core::domain::job::{ExecutionPhase, Job, JobState};
use stratus_core::domain::service::Service;
use uuid::Uuid;

use crate::backend::JobRunner;
use crate::error::{Result, SchedError};
use crate::registry::source::RemoteClients;

/// Creates, inspects and removes executions on any known cluster
#[async_trait]
pub trait Placement: Send + Sync {
    /// Starts `job` on `cluster`, returning the id it got there when remote
    async fn submit(&self, cluster: &ClusterId, service: &Service, job: &Job)
    -> Result<Option<Uuid>>;

    /// Removes the execution of `job` from `cluster`
    async fn withdraw(&self, cluster: &ClusterId, job: &Job) -> Result<()>;

    async fn phase(&self, cluster: &ClusterId, job: &Job) -> Result<ExecutionPhase>;

    /// Output of the execution of `job` on `cluster`
    async fn logs(&self, cluster: &ClusterId, job: &Job) -> Result<String>;
}

/// Local jobs go to the job runner, remote ones to that cluster's API
pub struct ClusterPlacement {
    runner: Arc<dyn JobRunner>,
    remotes: Arc<RemoteClients>,
    /// Name sent to remotes as the delegating control plane
    origin: String,
}

impl ClusterPlacement {
    pub fn new(runner: Arc<dyn JobRunner>, remotes: Arc<RemoteClients>, origin: &str) -> Self {
        Self {
            runner,
            remotes,
            origin: origin.to_string(),
        }
    }

    fn remote(&self, cluster: &ClusterId) -> Result<&stratus_client::ClusterClient> {
        self.remotes
            .get(cluster)
            .ok_or_else(|| SchedError::NotFound(format!("cluster {}", cluster)))
    }

    fn remote_id(job: &Job) -> Result<Uuid> {
        job.remote_job_id
            .ok_or_else(|| SchedError::NotFound(format!("job {} has no remote id", job.id)))
    }
}

#[async_trait]
impl Placement for ClusterPlacement {
    async fn submit(
        &self,
        cluster: &ClusterId,
        service: &Service,
        job: &Job,
    ) -> Result<Option<Uuid>> {
        if cluster.is_local() {
            self.runner.submit(service, job).await?;
            return Ok(None);
        }

        let admitted = self
            .remote(cluster)?
            .submit_delegated_job(&service.name, job.payload.clone(), &self.origin)
            .await?;
        Ok(Some(admitted.job_id))
    }

    async fn withdraw(&self, cluster: &ClusterId, job: &Job) -> Result<()> {
        if cluster.is_local() {
            return self.runner.withdraw(job).await;
        }

        let remote_id = Self::remote_id(job)?;
        self.remote(cluster)?.delete_job(remote_id).await?;
        Ok(())
    }

    async fn phase(&self, cluster: &ClusterId, job: &Job) -> Result<ExecutionPhase> {
        if cluster.is_local() {
            return self.runner.phase(job).await;
        }

        let Some(remote_id) = job.remote_job_id else {
            return Ok(ExecutionPhase::Missing);
        };
        match self.remote(cluster)?.get_job(remote_id).await {
            Ok(details) => Ok(details.phase.unwrap_or(match details.job.state {
                JobState::Completed => ExecutionPhase::Succeeded,
                JobState::Failed { .. } => ExecutionPhase::Failed,
                _ => ExecutionPhase::Pending,
            })),
            Err(e) if e.is_not_found() => Ok(ExecutionPhase::Missing),
            Err(e) => Err(e.into()),
        }
    }

    async fn logs(&self, cluster: &ClusterId, job: &Job) -> Result<String> {
        if cluster.is_local() {
            return self.runner.logs(job).await;
        }

        let remote_id = Self::remote_id(job)?;
        Ok(self.remote(cluster)?.get_job_logs(remote_id).await?)
    }
}
