//! Job command handlers
//!
//! Listing, inspection, logs and deletion of jobs.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use stratus_core::domain::job::{ExecutionPhase, Job, JobState};
use stratus_core::dto::job::JobDetails;

use crate::config::Config;
use crate::id_resolver::resolve_job_id;
use crate::types::IdOrPrefix;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List jobs
    List {
        /// Only jobs of this service
        #[arg(long)]
        service: Option<String>,
    },
    /// Get job details and execution phase
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Print the output of a job's execution
    Logs {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Withdraw a job from its cluster and delete it
    Delete {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Delete the finished jobs of a service
    Purge {
        #[arg(long)]
        service: String,
        /// Also delete jobs that have not finished
        #[arg(long)]
        all: bool,
    },
}

pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        JobCommands::List { service } => {
            let jobs = client.list_jobs(service.as_deref()).await?;
            if jobs.is_empty() {
                println!("{}", "No jobs found.".yellow());
            } else {
                println!("{}", format!("Found {} job(s):", jobs.len()).bold());
                println!();
                for job in &jobs {
                    print_job_summary(job);
                }
            }
        }
        JobCommands::Get { id } => {
            let uuid = resolve_job_id(&client, &IdOrPrefix::parse(&id)).await?;
            let details = client.get_job(uuid).await?;
            print_job_details(&details);
        }
        JobCommands::Delete { id } => {
            let uuid = resolve_job_id(&client, &IdOrPrefix::parse(&id)).await?;
            client.delete_job(uuid).await?;
            println!("{} Job {} deleted", "✓".green(), uuid.to_string().cyan());
        }
        JobCommands::Logs { id } => {
            let uuid = resolve_job_id(&client, &IdOrPrefix::parse(&id)).await?;
            print!("{}", client.get_job_logs(uuid).await?);
        }
        JobCommands::Purge { service, all } => {
            let removed = client.delete_jobs(&service, all).await?;
            println!(
                "{} {} job(s) of {} deleted",
                "✓".green(),
                removed.deleted.len(),
                service.cyan()
            );
        }
    }

    Ok(())
}

fn print_job_summary(job: &Job) {
    println!("  {} Job {}", "▸".cyan(), job.id.to_string().dimmed());
    println!("    Service:  {}", job.service);
    println!("    State:    {}", colorize_state(&job.state));
    println!(
        "    Created:  {}",
        job.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_job_details(details: &JobDetails) {
    let job = &details.job;

    println!("{}", "Job Details:".bold());
    println!("  ID:        {}", job.id.to_string().cyan());
    println!("  Service:   {}", job.service);
    println!("  State:     {}", colorize_state(&job.state));
    if let Some(phase) = details.phase {
        println!("  Phase:     {}", colorize_phase(phase));
    }
    if job.pinned {
        println!("  Pinned:    {}", "delegated from another cluster".dimmed());
    }
    println!("  Created:   {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(assigned) = job.assigned_at {
        println!("  Assigned:  {}", assigned.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(started) = job.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(finished) = job.finished_at {
        println!("  Finished:  {}", finished.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(remote) = job.remote_job_id {
        println!("  Remote ID: {}", remote.to_string().dimmed());
    }

    if !job.attempted_clusters.is_empty() {
        let attempted: Vec<&str> = job.attempted_clusters.iter().map(|c| c.as_str()).collect();
        println!(
            "  Attempts:  {} ({})",
            job.attempts,
            attempted.join(" → ")
        );
    }

    if !job.payload.is_empty() {
        println!("\n{}", "Payload:".bold());
        println!("{}", job.payload);
    }
}

fn colorize_state(state: &JobState) -> ColoredString {
    let label = state.to_string();
    match state {
        JobState::Pending => label.yellow(),
        JobState::Assigned { .. } => label.cyan(),
        JobState::Completed => label.green(),
        JobState::Failed { .. } => label.red(),
    }
}

fn colorize_phase(phase: ExecutionPhase) -> ColoredString {
    let label = format!("{:?}", phase);
    match phase {
        ExecutionPhase::Pending => label.yellow(),
        ExecutionPhase::Running => label.cyan(),
        ExecutionPhase::Succeeded => label.green(),
        ExecutionPhase::Failed => label.red(),
        ExecutionPhase::Missing => label.dimmed(),
    }
}
