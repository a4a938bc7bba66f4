//! Service definitions stored as ConfigMaps

use serde_json::Value;
use stratus_core::domain::service::Service;

use crate::error::{Result, SchedError};
use crate::kube::manifest::{self, DEFINITION_KEY, SERVICE_LABEL};
use crate::kube::{KubeApi, paths};

/// Definition storage shared by every backend variant
#[derive(Debug, Clone)]
pub struct DefinitionStore {
    api: KubeApi,
    namespace: String,
}

impl DefinitionStore {
    pub fn new(api: KubeApi, namespace: &str) -> Self {
        Self {
            api,
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn create(&self, service: &Service) -> Result<()> {
        service.validate().map_err(SchedError::InvalidSpec)?;
        let body = config_map(service, &self.namespace)?;
        self.api
            .create(&paths::config_maps(&self.namespace), &body)
            .await?;
        Ok(())
    }

    pub async fn read(&self, name: &str) -> Result<Service> {
        let cm: Value = self
            .api
            .get(&paths::config_map(&self.namespace, name))
            .await
            .map_err(|e| match SchedError::from(e) {
                SchedError::NotFound(_) => SchedError::NotFound(format!("service {}", name)),
                other => other,
            })?;
        parse(&cm)
    }

    pub async fn update(&self, service: &Service) -> Result<()> {
        service.validate().map_err(SchedError::InvalidSpec)?;
        let body = config_map(service, &self.namespace)?;
        self.api
            .replace(&paths::config_map(&self.namespace, &service.name), &body)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.api
            .delete(&paths::config_map(&self.namespace, name))
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Service>> {
        let items = self
            .api
            .list(
                &paths::config_maps(&self.namespace),
                &[("labelSelector", SERVICE_LABEL)],
            )
            .await?;

        let mut services = Vec::with_capacity(items.len());
        for item in &items {
            match parse(item) {
                Ok(service) => services.push(service),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable service definition"),
            }
        }
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }
}

fn config_map(service: &Service, namespace: &str) -> Result<Value> {
    manifest::definition_config_map(service, namespace)
        .map_err(|e| SchedError::Internal(format!("cannot encode service: {}", e)))
}

/// Service stored in a definition ConfigMap
pub fn parse(config_map: &Value) -> Result<Service> {
    let raw = config_map
        .get("data")
        .and_then(|data| data.get(DEFINITION_KEY))
        .and_then(Value::as_str)
        .ok_or_else(|| SchedError::Internal("definition ConfigMap has no service data".to_string()))?;
    serde_json::from_str(raw)
        .map_err(|e| SchedError::Internal(format!("corrupt service definition: {}", e)))
}
