//! Cluster status endpoints

use crate::ClusterClient;
use crate::error::Result;
use reqwest::Method;
use stratus_core::dto::cluster::{ClusterInfo, ClusterView};

impl ClusterClient {
    /// Capacity and usage of the cluster behind this control plane
    pub async fn get_cluster_info(&self) -> Result<ClusterInfo> {
        let response = self.request(Method::GET, "/system/status").send().await?;

        self.handle_response(response).await
    }

    /// Registry view of every cluster this control plane can delegate to
    pub async fn list_clusters(&self) -> Result<Vec<ClusterView>> {
        let response = self.request(Method::GET, "/system/clusters").send().await?;

        self.handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_cluster_info_sends_credentials() {
        let server = MockServer::start().await;
        let info = ClusterInfo {
            name: "edge".to_string(),
            nodes: 2,
            total_cpu_millis: 8000,
            free_cpu_millis: 3000,
            ..Default::default()
        };

        Mock::given(method("GET"))
            .and(path("/system/status"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&info))
            .expect(1)
            .mount(&server)
            .await;

        let client = ClusterClient::new(server.uri()).with_credentials("stratus", "secret");
        let fetched = client.get_cluster_info().await.unwrap();
        assert_eq!(fetched, info);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_transient() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/system/status"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = ClusterClient::new(server.uri())
            .get_cluster_info()
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(!err.is_transient());
    }
}
