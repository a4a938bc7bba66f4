//! Service domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::cluster::ClusterId;

/// Longest name Kubernetes accepts for the objects a service is stored as
pub const MAX_SERVICE_NAME_LEN: usize = 53;

/// Deployable unit: container image, entrypoint, resources and triggers
///
/// Immutable per version. Owned by the CRUD layer and read-only to the
/// scheduling core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub image: String,
    /// Entrypoint script executed inside the container
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub resources: ResourceRequest,
    /// Remote clusters this service may be delegated to
    #[serde(default)]
    pub clusters: Vec<ClusterEligibility>,
    #[serde(default)]
    pub input: Vec<StorageBinding>,
    #[serde(default)]
    pub output: Vec<StorageBinding>,
    /// Whether the service may be invoked synchronously
    #[serde(default)]
    pub synchronous: bool,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// Resources a single execution of a service requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    #[serde(default)]
    pub gpu: Option<u32>,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            cpu_millis: 1000,
            memory_bytes: 256 * 1024 * 1024,
            gpu: None,
        }
    }
}

impl ResourceRequest {
    /// Number of GPUs requested, zero when none
    pub fn gpus(&self) -> u32 {
        self.gpu.unwrap_or(0)
    }
}

/// A remote cluster a service is eligible to run on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEligibility {
    pub id: ClusterId,
    /// Lower values are preferred
    #[serde(default)]
    pub priority: u32,
}

/// Object-store binding used by storage triggers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBinding {
    /// Storage provider identifier (e.g. "minio.default")
    pub provider: String,
    /// Bucket and optional folder, e.g. "bucket/folder"
    pub path: String,
    #[serde(default)]
    pub prefix: Vec<String>,
    #[serde(default)]
    pub suffix: Vec<String>,
}

impl Service {
    /// Priority of a cluster in this service's eligibility list
    ///
    /// The local cluster is always eligible with priority 0.
    pub fn priority_for(&self, cluster: &ClusterId) -> Option<u32> {
        if cluster.is_local() {
            return Some(0);
        }
        self.clusters
            .iter()
            .find(|c| &c.id == cluster)
            .map(|c| c.priority)
    }

    /// Validates the descriptor before it reaches a backend
    pub fn validate(&self) -> Result<(), String> {
        validate_name(&self.name)?;

        if self.image.trim().is_empty() {
            return Err("image cannot be empty".to_string());
        }

        if self.resources.cpu_millis == 0 {
            return Err("cpu request must be greater than 0".to_string());
        }

        if self.resources.memory_bytes == 0 {
            return Err("memory request must be greater than 0".to_string());
        }

        if self.resources.gpu == Some(0) {
            return Err("gpu request must be omitted or greater than 0".to_string());
        }

        for cluster in &self.clusters {
            if cluster.id.is_local() {
                return Err(format!(
                    "cluster id '{}' is reserved for the local cluster",
                    cluster.id
                ));
            }
        }

        for binding in self.input.iter().chain(self.output.iter()) {
            if binding.path.trim_matches(|c| c == ' ' || c == '/').is_empty() {
                return Err(format!(
                    "storage binding for provider '{}' has an empty path",
                    binding.provider
                ));
            }
        }

        Ok(())
    }
}

/// Service names become Kubernetes object names (RFC 1123 labels)
fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name cannot be empty".to_string());
    }

    if name.len() > MAX_SERVICE_NAME_LEN {
        return Err(format!(
            "name is too long (max {} characters)",
            MAX_SERVICE_NAME_LEN
        ));
    }

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_edges = !name.starts_with('-') && !name.ends_with('-');

    if !valid_chars || !valid_edges {
        return Err(format!(
            "name '{}' must consist of lowercase alphanumerics or '-', and start and end with an alphanumeric",
            name
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str) -> Service {
        Service {
            name: name.to_string(),
            image: "ghcr.io/example/grayify:latest".to_string(),
            script: "#!/bin/sh\necho hi".to_string(),
            resources: ResourceRequest::default(),
            clusters: vec![],
            input: vec![],
            output: vec![],
            synchronous: false,
            environment: HashMap::new(),
        }
    }

    #[test]
    fn test_valid_service() {
        assert!(service("grayify").validate().is_ok());
        assert!(service("img-2-txt").validate().is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(service("").validate().is_err());
        assert!(service("Upper").validate().is_err());
        assert!(service("-leading").validate().is_err());
        assert!(service("under_score").validate().is_err());
        assert!(service(&"a".repeat(MAX_SERVICE_NAME_LEN + 1)).validate().is_err());
    }

    #[test]
    fn test_invalid_resources() {
        let mut svc = service("grayify");
        svc.resources.cpu_millis = 0;
        assert!(svc.validate().is_err());

        let mut svc = service("grayify");
        svc.resources.gpu = Some(0);
        assert!(svc.validate().is_err());
    }

    #[test]
    fn test_local_cluster_id_is_reserved() {
        let mut svc = service("grayify");
        svc.clusters.push(ClusterEligibility {
            id: ClusterId::local(),
            priority: 1,
        });
        assert!(svc.validate().is_err());
    }

    #[test]
    fn test_priority_for() {
        let mut svc = service("grayify");
        svc.clusters.push(ClusterEligibility {
            id: ClusterId::new("edge"),
            priority: 3,
        });

        assert_eq!(svc.priority_for(&ClusterId::local()), Some(0));
        assert_eq!(svc.priority_for(&ClusterId::new("edge")), Some(3));
        assert_eq!(svc.priority_for(&ClusterId::new("other")), None);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let svc: Service =
            serde_json::from_str(r#"{"name": "grayify", "image": "alpine"}"#).unwrap();
        assert_eq!(svc.resources, ResourceRequest::default());
        assert!(!svc.synchronous);
        assert!(svc.clusters.is_empty());
    }
}
