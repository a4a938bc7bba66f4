//! Service-related API endpoints

use crate::ClusterClient;
use crate::error::Result;
use reqwest::Method;
use stratus_core::domain::service::Service;

impl ClusterClient {
    // =============================================================================
    // Service Management
    // =============================================================================

    /// List every service deployed on the control plane
    pub async fn list_services(&self) -> Result<Vec<Service>> {
        let response = self.request(Method::GET, "/system/services").send().await?;

        self.handle_response(response).await
    }

    /// Get a service definition by name
    pub async fn get_service(&self, name: &str) -> Result<Service> {
        let path = format!("/system/services/{}", name);
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }

    /// Create a service
    pub async fn create_service(&self, service: &Service) -> Result<()> {
        let response = self
            .request(Method::POST, "/system/services")
            .json(service)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Replace an existing service definition
    pub async fn update_service(&self, service: &Service) -> Result<()> {
        let response = self
            .request(Method::PUT, "/system/services")
            .json(service)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Delete a service
    pub async fn delete_service(&self, name: &str) -> Result<()> {
        let path = format!("/system/services/{}", name);
        let response = self.request(Method::DELETE, &path).send().await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Synchronous Invocation
    // =============================================================================

    /// Invoke a service synchronously and return the raw response body
    pub async fn run_service(&self, name: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        let path = format!("/run/{}", name);
        let response = self.request(Method::POST, &path).body(payload).send().await?;
        let response = Self::check_status(response).await?;

        Ok(response.bytes().await?.to_vec())
    }
}
