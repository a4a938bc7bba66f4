//! OpenFaaS scale-to-zero
//!
//! Functions that received no invocation during the inactivity window,
//! according to the Prometheus instance shipped with OpenFaaS, are scaled
//! down to zero replicas through the gateway. The gateway brings them back
//! on their next invocation.

use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use super::openfaas::Gateway;
use super::{invocation_client, response_error};
use crate::config::OpenfaasConfig;
use crate::error::Result;

pub struct OpenfaasScaler {
    gateway: Gateway,
    prometheus_url: String,
    client: Client,
    functions_namespace: String,
    interval: Duration,
    inactivity: Duration,
}

#[derive(Debug, Deserialize)]
struct FunctionStatus {
    name: String,
    #[serde(default)]
    replicas: u64,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    data: QueryData,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    result: Vec<Sample>,
}

#[derive(Debug, Deserialize)]
struct Sample {
    metric: HashMap<String, String>,
    /// `[timestamp, "value"]`
    value: (f64, String),
}

impl OpenfaasScaler {
    pub fn new(config: &OpenfaasConfig, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            gateway: Gateway::new(config, timeout)?,
            prometheus_url: config.prometheus_url(),
            client: invocation_client(timeout)?,
            functions_namespace: config.functions_namespace(),
            interval: config.scaler_interval,
            inactivity: config.scaler_inactivity,
        })
    }

    /// Overrides the gateway and Prometheus locations
    pub fn with_urls(mut self, gateway: impl Into<String>, prometheus: impl Into<String>) -> Self {
        self.gateway = self.gateway.with_url(gateway);
        self.prometheus_url = prometheus.into().trim_end_matches('/').to_string();
        self
    }

    /// Run until shutdown is signaled
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            inactivity_secs = self.inactivity.as_secs(),
            "Starting OpenFaaS scaler"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(scaled) if !scaled.is_empty() => {
                            info!(functions = ?scaled, "Idle functions scaled to zero");
                        }
                        Ok(_) => tracing::debug!("No idle function to scale"),
                        Err(e) => error!(error = %e, "Scaling cycle failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("OpenFaaS scaler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Scales every idle function with replicas down, returning their names
    pub async fn run_once(&self) -> Result<Vec<String>> {
        let functions = self.functions().await?;
        let active = self.active_functions().await?;

        let mut scaled = Vec::new();
        for function in functions {
            if function.replicas == 0 || active.contains(&function.name) {
                continue;
            }
            match self.scale_to_zero(&function.name).await {
                Ok(()) => scaled.push(function.name),
                Err(e) => {
                    tracing::warn!(function = %function.name, error = %e, "Failed to scale function down")
                }
            }
        }
        Ok(scaled)
    }

    async fn functions(&self) -> Result<Vec<FunctionStatus>> {
        let response = self
            .gateway
            .request(Method::GET, "/system/functions")
            .query(&[("namespace", self.functions_namespace.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(response_error("openfaas gateway", response).await);
        }
        Ok(response.json().await?)
    }

    /// Functions invoked at least once during the inactivity window
    async fn active_functions(&self) -> Result<HashSet<String>> {
        let query = format!(
            "sum by (function_name) (increase(gateway_function_invocation_total[{}s]))",
            self.inactivity.as_secs()
        );
        let response = self
            .client
            .get(format!("{}/api/v1/query", self.prometheus_url))
            .query(&[("query", query.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(response_error("prometheus", response).await);
        }
        let body: QueryResponse = response.json().await?;

        let suffix = format!(".{}", self.functions_namespace);
        Ok(body
            .data
            .result
            .into_iter()
            .filter(|sample| sample.value.1.parse::<f64>().is_ok_and(|v| v > 0.0))
            .filter_map(|sample| sample.metric.get("function_name").cloned())
            .map(|name| match name.strip_suffix(&suffix) {
                Some(bare) => bare.to_string(),
                None => name,
            })
            .collect())
    }

    async fn scale_to_zero(&self, name: &str) -> Result<()> {
        let response = self
            .gateway
            .request(Method::POST, &format!("/system/scale-function/{}", name))
            .query(&[("namespace", self.functions_namespace.as_str())])
            .json(&json!({
                "serviceName": name,
                "namespace": self.functions_namespace,
                "replicas": 0,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(response_error(&format!("scaling function {}", name), response).await);
        }
        tracing::debug!(function = %name, "Function scaled to zero");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scaler(server: &MockServer) -> OpenfaasScaler {
        let config = OpenfaasConfig {
            namespace: "openfaas".to_string(),
            port: 8080,
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            prometheus_port: 9090,
            scaler_enable: true,
            scaler_interval: Duration::from_secs(120),
            scaler_inactivity: Duration::from_secs(600),
        };
        OpenfaasScaler::new(&config, Duration::from_secs(5))
            .unwrap()
            .with_urls(server.uri(), server.uri())
    }

    async fn mount_functions(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/system/functions"))
            .and(query_param("namespace", "openfaas-fn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "idle", "replicas": 1 },
                { "name": "busy", "replicas": 2 },
                { "name": "cold", "replicas": 0 },
            ])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_only_idle_running_functions_are_scaled() {
        let server = MockServer::start().await;
        mount_functions(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .and(query_param(
                "query",
                "sum by (function_name) (increase(gateway_function_invocation_total[600s]))",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {
                    "resultType": "vector",
                    "result": [
                        { "metric": { "function_name": "busy.openfaas-fn" }, "value": [1700000000.0, "3"] },
                        { "metric": { "function_name": "idle.openfaas-fn" }, "value": [1700000000.0, "0"] },
                    ],
                },
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/system/scale-function/idle"))
            .and(body_partial_json(json!({ "serviceName": "idle", "replicas": 0 })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let scaled = scaler(&server).run_once().await.unwrap();
        assert_eq!(scaled, vec!["idle".to_string()]);
    }

    #[tokio::test]
    async fn test_prometheus_outage_scales_nothing() {
        let server = MockServer::start().await;
        mount_functions(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/system/scale-function/idle"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        let err = scaler(&server).run_once().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = MockServer::start().await;
        let scaler = scaler(&server);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scaler.run(rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
