//! Stratus CLI
//!
//! Command-line interface for operating a Stratus control plane.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Stratus multi-cluster control plane CLI", long_about = None)]
struct Cli {
    /// Control plane URL
    #[arg(long, env = "STRATUS_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    /// Basic auth user for the /system API
    #[arg(long, env = "STRATUS_USERNAME")]
    user: Option<String>,

    /// Basic auth password for the /system API
    #[arg(long, env = "STRATUS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        endpoint: cli.endpoint,
        user: cli.user,
        password: cli.password,
    };

    handle_command(cli.command, &config).await
}
