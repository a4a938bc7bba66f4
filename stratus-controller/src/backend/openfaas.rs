//! OpenFaaS backend
//!
//! Definitions live in ConfigMaps like every variant; the function itself
//! is deployed through the gateway's REST API, which also serves
//! synchronous invocations.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::json;
use std::time::Duration;
use stratus_core::domain::cluster::BackendKind;
use stratus_core::domain::service::Service;
use stratus_core::dto::cluster::ClusterInfo;

use super::{DefinitionStore, ServerlessBackend, SyncBackend, invocation_client, response_error};
use crate::config::OpenfaasConfig;
use crate::error::Result;
use crate::kube::{KubeApi, info, manifest};

pub struct OpenfaasBackend {
    api: KubeApi,
    definitions: DefinitionStore,
    cluster_name: String,
    gateway: Gateway,
    functions_namespace: String,
}

/// Authenticated access to the OpenFaaS gateway
#[derive(Clone)]
pub struct Gateway {
    url: String,
    credentials: Option<(String, String)>,
    client: Client,
}

impl Gateway {
    pub fn new(config: &OpenfaasConfig, timeout: Duration) -> anyhow::Result<Self> {
        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };

        Ok(Self {
            url: config.gateway_url(),
            credentials,
            client: invocation_client(timeout)?,
        })
    }

    /// Overrides the gateway location
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.url, path));
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }
}

impl OpenfaasBackend {
    pub fn new(
        api: KubeApi,
        definitions: DefinitionStore,
        cluster_name: &str,
        config: &OpenfaasConfig,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            api,
            definitions,
            cluster_name: cluster_name.to_string(),
            gateway: Gateway::new(config, timeout)?,
            functions_namespace: config.functions_namespace(),
        })
    }

    /// Overrides the gateway location
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway = self.gateway.with_url(url);
        self
    }

    fn gateway(&self, method: Method, path: &str) -> RequestBuilder {
        self.gateway.request(method, path)
    }

    async fn deploy(&self, method: Method, service: &Service) -> Result<()> {
        let body = manifest::openfaas_function(service, &self.functions_namespace);
        let response = self
            .gateway(method, "/system/functions")
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(response_error("openfaas gateway", response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl ServerlessBackend for OpenfaasBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Openfaas
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        self.definitions.create(service).await?;

        if let Err(e) = self.deploy(Method::POST, service).await {
            // Keep the definition and the function consistent
            if let Err(rollback) = self.definitions.delete(&service.name).await {
                tracing::warn!(service = %service.name, error = %rollback, "Definition rollback failed");
            }
            return Err(e);
        }

        tracing::info!(service = %service.name, "OpenFaaS function deployed");
        Ok(())
    }

    async fn read_service(&self, name: &str) -> Result<Service> {
        self.definitions.read(name).await
    }

    async fn update_service(&self, service: &Service) -> Result<()> {
        self.definitions.update(service).await?;
        self.deploy(Method::PUT, service).await
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        let response = self
            .gateway(Method::DELETE, "/system/functions")
            .json(&json!({ "functionName": name }))
            .send()
            .await?;
        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(response_error("openfaas gateway", response).await);
        }

        self.definitions.delete(name).await
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        self.definitions.list().await
    }

    async fn cluster_info(&self) -> Result<ClusterInfo> {
        Ok(info::cluster_info(&self.api, &self.cluster_name, BackendKind::Openfaas).await?)
    }

    fn as_sync(&self) -> Option<&dyn SyncBackend> {
        Some(self)
    }
}

#[async_trait]
impl SyncBackend for OpenfaasBackend {
    async fn invoke(&self, name: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        let response = self
            .gateway(Method::POST, &format!("/function/{}", name))
            .body(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(response_error(&format!("function {}", name), response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }
}
