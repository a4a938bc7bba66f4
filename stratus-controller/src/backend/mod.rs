//! Backend adapters over the local serverless runtime
//!
//! Every variant stores service definitions and reports cluster capacity.
//! Variants whose runtime serves request/response calls additionally expose
//! [`SyncBackend`] through [`ServerlessBackend::as_sync`]; callers probe it
//! before invoking.

pub mod definitions;
pub mod jobs;
pub mod knative;
pub mod kube;
pub mod openfaas;
pub mod scaler;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use stratus_core::domain::cluster::BackendKind;
use stratus_core::domain::service::Service;
use stratus_core::dto::cluster::ClusterInfo;

use crate::config::Config;
use crate::error::{Result, SchedError};
use crate::kube::KubeApi;

pub use definitions::DefinitionStore;
pub use jobs::{JobRunner, KubeJobRunner};
pub use knative::KnativeBackend;
pub use kube::KubeBackend;
pub use openfaas::OpenfaasBackend;
pub use scaler::OpenfaasScaler;

/// Service lifecycle on the local runtime
#[async_trait]
pub trait ServerlessBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn create_service(&self, service: &Service) -> Result<()>;

    async fn read_service(&self, name: &str) -> Result<Service>;

    async fn update_service(&self, service: &Service) -> Result<()>;

    async fn delete_service(&self, name: &str) -> Result<()>;

    async fn list_services(&self) -> Result<Vec<Service>>;

    /// Capacity and usage of the cluster this backend runs on
    async fn cluster_info(&self) -> Result<ClusterInfo>;

    /// Synchronous invocation capability, if the runtime has one
    fn as_sync(&self) -> Option<&dyn SyncBackend> {
        None
    }
}

/// Request/response invocation of a deployed service
#[async_trait]
pub trait SyncBackend: Send + Sync {
    async fn invoke(&self, name: &str, payload: Vec<u8>) -> Result<Vec<u8>>;
}

/// Builds the backend selected by `serverless_backend`
pub fn make_backend(config: &Config, api: KubeApi) -> anyhow::Result<Arc<dyn ServerlessBackend>> {
    let definitions = DefinitionStore::new(api.clone(), &config.services_namespace);

    let backend: Arc<dyn ServerlessBackend> = match config.serverless_backend {
        None | Some(BackendKind::Kube) => Arc::new(KubeBackend::new(api, definitions, &config.name)),
        Some(BackendKind::Openfaas) => Arc::new(OpenfaasBackend::new(
            api,
            definitions,
            &config.name,
            &config.openfaas,
            config.read_timeout,
        )?),
        Some(BackendKind::Knative) => Arc::new(KnativeBackend::new(
            api,
            definitions,
            &config.name,
            &config.services_namespace,
            config.read_timeout,
        )?),
    };

    tracing::info!(backend = %backend.kind(), "Serverless backend selected");
    Ok(backend)
}

/// HTTP client for calls into deployed services
pub(crate) fn invocation_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Reads a non-success response into a classified error
pub(crate) async fn response_error(context: &str, response: reqwest::Response) -> SchedError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    SchedError::from_status(status, format!("{}: {}", context, body.trim()))
}
