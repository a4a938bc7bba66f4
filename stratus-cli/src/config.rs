//! Configuration module
//!
//! Connection settings for the control plane the CLI talks to.

use stratus_client::ClusterClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the control plane
    pub endpoint: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Config {
    /// Client for the configured control plane, authenticated when a user is set
    pub fn client(&self) -> ClusterClient {
        let client = ClusterClient::new(&self.endpoint);
        match &self.user {
            Some(user) => client.with_credentials(user, self.password.as_deref().unwrap_or_default()),
            None => client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_uses_endpoint() {
        let config = Config {
            endpoint: "http://stratus.example:8080/".to_string(),
            user: Some("admin".to_string()),
            password: None,
        };
        assert_eq!(config.client().base_url(), "http://stratus.example:8080");
    }
}
