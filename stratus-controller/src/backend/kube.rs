//! Raw batch-job backend

use async_trait::async_trait;
use stratus_core::domain::cluster::BackendKind;
use stratus_core::domain::service::Service;
use stratus_core::dto::cluster::ClusterInfo;

use super::{DefinitionStore, ServerlessBackend};
use crate::error::Result;
use crate::kube::{KubeApi, info};

/// Services are definitions only; every invocation is a batch Job
pub struct KubeBackend {
    api: KubeApi,
    definitions: DefinitionStore,
    cluster_name: String,
}

impl KubeBackend {
    pub fn new(api: KubeApi, definitions: DefinitionStore, cluster_name: &str) -> Self {
        Self {
            api,
            definitions,
            cluster_name: cluster_name.to_string(),
        }
    }
}

#[async_trait]
impl ServerlessBackend for KubeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kube
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        self.definitions.create(service).await?;
        tracing::info!(service = %service.name, "Service created");
        Ok(())
    }

    async fn read_service(&self, name: &str) -> Result<Service> {
        self.definitions.read(name).await
    }

    async fn update_service(&self, service: &Service) -> Result<()> {
        self.definitions.update(service).await
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        self.definitions.delete(name).await?;
        tracing::info!(service = %name, "Service deleted");
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        self.definitions.list().await
    }

    async fn cluster_info(&self) -> Result<ClusterInfo> {
        Ok(info::cluster_info(&self.api, &self.cluster_name, BackendKind::Kube).await?)
    }
}
