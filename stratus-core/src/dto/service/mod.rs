//! Service DTOs

use serde::{Deserialize, Serialize};

use crate::domain::service::Service;

/// Lightweight service summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub name: String,
    pub image: String,
    pub synchronous: bool,
    pub clusters: usize,
}

impl From<&Service> for ServiceSummary {
    fn from(service: &Service) -> Self {
        Self {
            name: service.name.clone(),
            image: service.image.clone(),
            synchronous: service.synchronous,
            clusters: service.clusters.len(),
        }
    }
}
