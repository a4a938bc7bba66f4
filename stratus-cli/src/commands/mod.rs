//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod cluster;
mod invoke;
mod job;
mod service;

pub use cluster::ClusterCommands;
pub use job::JobCommands;
pub use service::ServiceCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Cluster capacity and registry state
    Cluster {
        #[command(subcommand)]
        command: ClusterCommands,
    },
    /// Service management
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },
    /// Job management
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Invoke a service
    Invoke {
        /// Service name
        service: String,

        /// Wait for the response instead of admitting a job
        #[arg(long)]
        sync: bool,

        /// Request body, empty when omitted
        #[arg(short, long)]
        payload: Option<String>,
    },
}

/// Routes a command to its handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Cluster { command } => cluster::handle_cluster_command(command, config).await,
        Commands::Service { command } => service::handle_service_command(command, config).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Invoke {
            service,
            sync,
            payload,
        } => invoke::invoke(config, &service, sync, payload.unwrap_or_default()).await,
    }
}
