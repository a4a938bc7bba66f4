//! Invocation Router
//!
//! The single admission entry point shared by the HTTP surface and storage
//! triggers. Synchronous calls go straight to a capable backend and leave
//! no trace; everything else becomes a job handed to the Resource Manager.

use std::sync::Arc;
use stratus_core::domain::job::Job;

use crate::backend::ServerlessBackend;
use crate::error::{Result, SchedError};
use crate::scheduler::ResourceManager;

/// How the caller wants a service invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitMode {
    /// Synchronous when the service and the backend allow it
    Auto,
    Async,
    /// Synchronous or an error
    Sync,
}

#[derive(Debug)]
pub enum AdmitOutcome {
    /// Response of a synchronous invocation
    Sync(Vec<u8>),
    /// Admitted job, already assigned to a cluster
    Job(Job),
}

pub struct InvocationRouter {
    backend: Arc<dyn ServerlessBackend>,
    manager: Arc<ResourceManager>,
}

impl InvocationRouter {
    pub fn new(backend: Arc<dyn ServerlessBackend>, manager: Arc<ResourceManager>) -> Self {
        Self { backend, manager }
    }

    pub fn supports_sync(&self) -> bool {
        self.backend.as_sync().is_some()
    }

    pub async fn admit(&self, name: &str, payload: Vec<u8>, mode: AdmitMode) -> Result<AdmitOutcome> {
        let service = self.backend.read_service(name).await?;

        let sync = match (mode, self.backend.as_sync()) {
            (AdmitMode::Async, _) => None,
            (AdmitMode::Auto, sync) if service.synchronous => sync,
            (AdmitMode::Auto, _) => None,
            (AdmitMode::Sync, Some(sync)) => Some(sync),
            (AdmitMode::Sync, None) => {
                return Err(SchedError::BackendUnsupported(format!(
                    "synchronous invocation on the {} backend",
                    self.backend.kind()
                )));
            }
        };

        if let Some(sync) = sync {
            tracing::debug!(service = %name, "Invoking synchronously");
            return sync.invoke(name, payload).await.map(AdmitOutcome::Sync);
        }

        let job = Job::new(&service.name, payload_text(payload)?);
        tracing::info!(job_id = %job.id, service = %name, "Job admitted");
        self.manager.admit(&service, job).await.map(AdmitOutcome::Job)
    }

    /// Admits a job another control plane delegated to this one
    pub async fn admit_delegated(&self, name: &str, payload: Vec<u8>, origin: &str) -> Result<Job> {
        let service = self.backend.read_service(name).await?;

        let mut job = Job::new(&service.name, payload_text(payload)?);
        job.pinned = true;
        tracing::info!(job_id = %job.id, service = %name, origin = %origin, "Delegated job admitted");
        self.manager.admit(&service, job).await
    }
}

fn payload_text(payload: Vec<u8>) -> Result<String> {
    String::from_utf8(payload)
        .map_err(|_| SchedError::InvalidSpec("asynchronous payloads must be UTF-8".to_string()))
}
