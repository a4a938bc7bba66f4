//! Invocation command handler

use anyhow::Result;
use colored::*;
use std::io::Write;

use crate::config::Config;

pub async fn invoke(config: &Config, service: &str, sync: bool, payload: String) -> Result<()> {
    let client = config.client();

    if sync {
        let output = client.run_service(service, payload.into_bytes()).await?;
        std::io::stdout().write_all(&output)?;
        return Ok(());
    }

    let admitted = client.admit_job(service, payload).await?;
    println!(
        "{} Job {} admitted for {}",
        "✓".green(),
        admitted.job_id.to_string().cyan(),
        service.bold()
    );
    Ok(())
}
