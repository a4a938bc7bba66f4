//! Kubernetes API access
//!
//! A thin JSON client over the Kubernetes REST API. Objects are handled as
//! `serde_json::Value` at this layer; typed views live with their users.

pub mod info;
pub mod manifest;
pub mod quantity;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::error::SchedError;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Errors returned by the Kubernetes API client
#[derive(Debug, Error)]
pub enum KubeError {
    #[error("kubernetes request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("kubernetes API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("kubernetes client configuration: {0}")]
    Config(String),
}

impl KubeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api { status: 404 | 410, .. })
    }
}

impl From<KubeError> for SchedError {
    fn from(err: KubeError) -> Self {
        match &err {
            KubeError::Api { status, .. } => SchedError::from_status(*status, err.to_string()),
            KubeError::Request(e) if e.is_decode() => SchedError::Internal(err.to_string()),
            KubeError::Request(_) => SchedError::Transient(err.to_string()),
            KubeError::Config(_) => SchedError::Internal(err.to_string()),
        }
    }
}

pub type KubeResult<T> = std::result::Result<T, KubeError>;

/// JSON client for the Kubernetes API server
#[derive(Debug, Clone)]
pub struct KubeApi {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl KubeApi {
    /// Client for an explicit API server URL
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> KubeResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self::with_client(base_url, token, client))
    }

    pub fn with_client(base_url: impl Into<String>, token: Option<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        }
    }

    /// Client using the pod's service account
    pub fn in_cluster() -> KubeResult<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| KubeError::Config("KUBERNETES_SERVICE_HOST is not set".to_string()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        let token = std::fs::read_to_string(format!("{}/token", SERVICE_ACCOUNT_DIR))
            .map_err(|e| KubeError::Config(format!("cannot read service account token: {}", e)))?;
        let ca = std::fs::read(format!("{}/ca.crt", SERVICE_ACCOUNT_DIR))
            .map_err(|e| KubeError::Config(format!("cannot read cluster CA: {}", e)))?;

        let client = Client::builder()
            .add_root_certificate(reqwest::Certificate::from_pem(&ca)?)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self::with_client(
            format!("https://{}:{}", host, port),
            Some(token.trim().to_string()),
            client,
        ))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> KubeResult<T> {
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        Ok(response.json().await?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> KubeResult<T> {
        self.send(self.request(Method::GET, path)).await
    }

    /// GET with query parameters such as `labelSelector`
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> KubeResult<T> {
        self.send(self.request(Method::GET, path).query(query)).await
    }

    /// GET of a plain text resource such as pod logs
    pub async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> KubeResult<String> {
        let response = self.request(Method::GET, path).query(query).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        Ok(response.text().await?)
    }

    /// `items` of a list response
    pub async fn list(&self, path: &str, query: &[(&str, &str)]) -> KubeResult<Vec<Value>> {
        let list: Value = self.get_with_query(path, query).await?;
        Ok(match list.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        })
    }

    pub async fn create(&self, collection_path: &str, body: &Value) -> KubeResult<Value> {
        self.send(self.request(Method::POST, collection_path).json(body))
            .await
    }

    /// Replace an object, carrying over its current `resourceVersion`
    pub async fn replace(&self, path: &str, body: &Value) -> KubeResult<Value> {
        let current: Value = self.get(path).await?;
        let mut body = body.clone();
        if let Some(version) = current.pointer("/metadata/resourceVersion") {
            body["metadata"]["resourceVersion"] = version.clone();
        }
        self.send(self.request(Method::PUT, path).json(&body)).await
    }

    /// Delete an object, cascading to its dependents in the background
    pub async fn delete(&self, path: &str) -> KubeResult<()> {
        let body = serde_json::json!({
            "kind": "DeleteOptions",
            "apiVersion": "v1",
            "propagationPolicy": "Background",
        });
        let _: Value = self
            .send(self.request(Method::DELETE, path).json(&body))
            .await?;
        Ok(())
    }
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> KubeError {
    let body = response.text().await.unwrap_or_default();
    // Kubernetes returns a Status object; prefer its message
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);

    KubeError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Path helpers for the namespaced objects the controller manages
pub mod paths {
    pub fn config_maps(namespace: &str) -> String {
        format!("/api/v1/namespaces/{}/configmaps", namespace)
    }

    pub fn config_map(namespace: &str, name: &str) -> String {
        format!("{}/{}", config_maps(namespace), name)
    }

    pub fn jobs(namespace: &str) -> String {
        format!("/apis/batch/v1/namespaces/{}/jobs", namespace)
    }

    pub fn job(namespace: &str, name: &str) -> String {
        format!("{}/{}", jobs(namespace), name)
    }

    pub fn pods(namespace: &str) -> String {
        format!("/api/v1/namespaces/{}/pods", namespace)
    }

    pub fn pod_log(namespace: &str, name: &str) -> String {
        format!("{}/{}/log", pods(namespace), name)
    }

    pub fn knative_services(namespace: &str) -> String {
        format!("/apis/serving.knative.dev/v1/namespaces/{}/services", namespace)
    }

    pub fn knative_service(namespace: &str, name: &str) -> String {
        format!("{}/{}", knative_services(namespace), name)
    }

    pub const NODES: &str = "/api/v1/nodes";
    pub const ALL_PODS: &str = "/api/v1/pods";
}
