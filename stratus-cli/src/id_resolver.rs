//! ID resolver module
//!
//! Resolves job id prefixes to full UUIDs by listing jobs on the control
//! plane, so operators can type short unambiguous prefixes.

use anyhow::{Context, Result, anyhow};
use stratus_client::ClusterClient;
use stratus_core::domain::job::Job;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a job ID or prefix to a full UUID
///
/// A full UUID is returned without contacting the control plane.
pub async fn resolve_job_id(client: &ClusterClient, id: &IdOrPrefix) -> Result<Uuid> {
    if let IdOrPrefix::Full(uuid) = id {
        return Ok(*uuid);
    }

    let jobs = client
        .list_jobs(None)
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    select(&jobs, id)
}

fn select(jobs: &[Job], id: &IdOrPrefix) -> Result<Uuid> {
    let matches: Vec<Uuid> = jobs.iter().map(|j| j.id).filter(|j| id.matches(j)).collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No job found with ID starting with '{}'", id)),
        [single] => Ok(*single),
        _ => {
            let ids: Vec<String> = matches.iter().map(|j| j.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                id,
                ids.join(", ")
            ))
        }
    }
}
