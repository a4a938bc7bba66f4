//! Service command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use stratus_core::domain::service::Service;
use stratus_core::dto::service::ServiceSummary;

use crate::config::Config;

#[derive(Subcommand)]
pub enum ServiceCommands {
    /// List all services
    List,
    /// Show a service definition
    Get {
        name: String,
    },
    /// Delete a service
    Delete {
        name: String,
    },
}

pub async fn handle_service_command(command: ServiceCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        ServiceCommands::List => {
            let services = client.list_services().await?;
            if services.is_empty() {
                println!("{}", "No services found.".yellow());
            } else {
                println!("{}", format!("Found {} service(s):", services.len()).bold());
                println!();
                for service in &services {
                    print_service_summary(&ServiceSummary::from(service));
                }
            }
        }
        ServiceCommands::Get { name } => {
            let service = client.get_service(&name).await?;
            print_service_details(&service)?;
        }
        ServiceCommands::Delete { name } => {
            client.delete_service(&name).await?;
            println!("{} Service {} deleted", "✓".green(), name.cyan());
        }
    }

    Ok(())
}

fn print_service_summary(summary: &ServiceSummary) {
    println!("  {} {}", "▸".cyan(), summary.name.bold());
    println!("    Image:    {}", summary.image.dimmed());
    println!(
        "    Mode:     {}",
        if summary.synchronous { "sync" } else { "async" }
    );
    println!("    Remotes:  {}", summary.clusters);
    println!();
}

fn print_service_details(service: &Service) -> Result<()> {
    println!("{}", "Service Details:".bold());
    println!("{}", serde_json::to_string_pretty(service)?);
    Ok(())
}
