//! Stratus HTTP Client
//!
//! A type-safe HTTP client for the API of a Stratus control plane.
//!
//! The controller uses it to talk to remote clusters (status polling,
//! delegated job submission, phase queries and withdrawal); the CLI uses it
//! to talk to the control plane it administers.
//!
//! # Example
//!
//! ```no_run
//! use stratus_client::ClusterClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ClusterClient::new("http://localhost:8080")
//!         .with_credentials("stratus", "secret");
//!
//!     let info = client.get_cluster_info().await?;
//!     println!("Free CPU: {}m", info.free_cpu_millis);
//!     Ok(())
//! }
//! ```

mod cluster;
pub mod error;
mod jobs;
mod services;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client for a Stratus control plane
///
/// Methods are organized into logical groups:
/// - Cluster status
/// - Job admission, inspection and withdrawal
/// - Service management and synchronous runs
#[derive(Debug, Clone)]
pub struct ClusterClient {
    /// Base URL of the control plane (e.g., "http://localhost:8080")
    base_url: String,
    /// Basic auth credentials for the `/system` routes
    credentials: Option<(String, String)>,
    /// HTTP client instance
    client: Client,
}

impl ClusterClient {
    /// Create a new client
    ///
    /// # Example
    /// ```
    /// use stratus_client::ClusterClient;
    ///
    /// let client = ClusterClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a client whose every request is bounded by `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
            client,
        }
    }

    /// Attach basic auth credentials
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Get the base URL of the control plane
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request against `path`, authenticated when credentials are set
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Check the status code of a response without a body
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        Self::check_status(response).await.map(|_| ())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }
}
