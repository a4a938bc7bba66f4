//! Knative Serving backend

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use stratus_core::domain::cluster::BackendKind;
use stratus_core::domain::service::Service;
use stratus_core::dto::cluster::ClusterInfo;

use super::{DefinitionStore, ServerlessBackend, SyncBackend, invocation_client, response_error};
use crate::error::Result;
use crate::kube::{KubeApi, info, manifest, paths};

pub struct KnativeBackend {
    api: KubeApi,
    definitions: DefinitionStore,
    cluster_name: String,
    namespace: String,
    client: Client,
}

impl KnativeBackend {
    pub fn new(
        api: KubeApi,
        definitions: DefinitionStore,
        cluster_name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            api,
            definitions,
            cluster_name: cluster_name.to_string(),
            namespace: namespace.to_string(),
            client: invocation_client(timeout)?,
        })
    }

    /// In-cluster address of a Knative service
    pub fn service_url(&self, name: &str) -> String {
        format!("http://{}.{}.svc.cluster.local", name, self.namespace)
    }
}

#[async_trait]
impl ServerlessBackend for KnativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Knative
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        self.definitions.create(service).await?;

        let body = manifest::knative_service(service, &self.namespace);
        if let Err(e) = self
            .api
            .create(&paths::knative_services(&self.namespace), &body)
            .await
        {
            if let Err(rollback) = self.definitions.delete(&service.name).await {
                tracing::warn!(service = %service.name, error = %rollback, "Definition rollback failed");
            }
            return Err(e.into());
        }

        tracing::info!(service = %service.name, "Knative service created");
        Ok(())
    }

    async fn read_service(&self, name: &str) -> Result<Service> {
        self.definitions.read(name).await
    }

    async fn update_service(&self, service: &Service) -> Result<()> {
        self.definitions.update(service).await?;
        let body = manifest::knative_service(service, &self.namespace);
        self.api
            .replace(&paths::knative_service(&self.namespace, &service.name), &body)
            .await?;
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        match self
            .api
            .delete(&paths::knative_service(&self.namespace, name))
            .await
        {
            Err(e) if !e.is_not_found() => return Err(e.into()),
            _ => {}
        }
        self.definitions.delete(name).await
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        self.definitions.list().await
    }

    async fn cluster_info(&self) -> Result<ClusterInfo> {
        Ok(info::cluster_info(&self.api, &self.cluster_name, BackendKind::Knative).await?)
    }

    fn as_sync(&self) -> Option<&dyn SyncBackend> {
        Some(self)
    }
}

#[async_trait]
impl SyncBackend for KnativeBackend {
    async fn invoke(&self, name: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(self.service_url(name))
            .body(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(response_error(&format!("service {}", name), response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }
}
