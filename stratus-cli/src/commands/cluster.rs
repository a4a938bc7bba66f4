//! Cluster command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use stratus_core::dto::cluster::{CircuitState, ClusterInfo, ClusterView};

use crate::config::Config;

const MIB: u64 = 1024 * 1024;

#[derive(Subcommand)]
pub enum ClusterCommands {
    /// Capacity of the cluster the control plane runs on
    Status,
    /// Every cluster known to the registry
    List,
}

pub async fn handle_cluster_command(command: ClusterCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        ClusterCommands::Status => {
            let info = client.get_cluster_info().await?;
            print_cluster_info(&info);
        }
        ClusterCommands::List => {
            let clusters = client.list_clusters().await?;
            if clusters.is_empty() {
                println!("{}", "No clusters found.".yellow());
            }
            for cluster in &clusters {
                print_cluster_view(cluster);
            }
        }
    }

    Ok(())
}

fn print_cluster_info(info: &ClusterInfo) {
    println!("{}", "Cluster Status:".bold());
    println!("  Name:    {}", info.name.cyan());
    if let Some(backend) = info.backend {
        println!("  Backend: {}", backend);
    }
    println!("  Nodes:   {}", info.nodes);
    println!(
        "  CPU:     {} / {} cores free",
        cores(info.free_cpu_millis),
        cores(info.total_cpu_millis)
    );
    println!(
        "  Memory:  {} / {} MiB free",
        info.free_memory_bytes / MIB,
        info.total_memory_bytes / MIB
    );
    if info.total_gpu > 0 {
        println!("  GPU:     {} / {} free", info.free_gpu, info.total_gpu);
    }
}

fn print_cluster_view(view: &ClusterView) {
    let circuit = match view.circuit {
        CircuitState::Closed => "closed".green(),
        CircuitState::HalfOpen => "half-open".yellow(),
        CircuitState::Open => "open".red(),
    };
    let freshness = if !view.snapshot.reachable {
        "unreachable".red()
    } else if view.fresh {
        "fresh".green()
    } else {
        "stale".yellow()
    };

    println!("  {} {}", "▸".cyan(), view.id.as_str().bold());
    if let Some(endpoint) = &view.endpoint {
        println!("    Endpoint: {}", endpoint.dimmed());
    }
    if let Some(capability) = view.capability {
        println!("    Backend:  {}", capability);
    }
    println!("    Snapshot: {}", freshness);
    println!(
        "    CPU free: {} / {} cores",
        cores(view.snapshot.free_cpu_millis),
        cores(view.snapshot.total_cpu_millis)
    );
    println!(
        "    Circuit:  {} ({} consecutive failures)",
        circuit, view.consecutive_failures
    );
    println!();
}

fn cores(millis: u64) -> String {
    format!("{:.1}", millis as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cores() {
        assert_eq!(cores(2500), "2.5");
        assert_eq!(cores(0), "0.0");
    }
}
