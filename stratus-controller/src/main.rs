use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stratus_controller::api::{self, AppState};
use stratus_controller::backend::{self, KubeJobRunner, OpenfaasScaler};
use stratus_controller::config::Config;
use stratus_controller::db;
use stratus_controller::kube::KubeApi;
use stratus_controller::registry::ClusterRegistry;
use stratus_controller::registry::source::{ClusterSnapshotSource, connect_remotes};
use stratus_controller::router::InvocationRouter;
use stratus_controller::scheduler::{
    ClusterPlacement, JobTracker, ReScheduler, RegistryRefresher, ResourceManager,
};
use stratus_controller::store::{JobStore, MemoryJobStore, PgJobStore};
use stratus_core::domain::cluster::BackendKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stratus_controller=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stratus control plane...");

    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);

    let kube = match &config.kube_api_url {
        Some(url) => KubeApi::new(url, None),
        None => KubeApi::in_cluster(),
    }
    .context("Failed to configure the Kubernetes API client")?;

    let backend = backend::make_backend(&config, kube.clone())?;

    // Cluster registry over the local backend, plus the remote control
    // planes when delegation is enabled
    let delegation_targets = if config.resource_manager_enable {
        config.remote_clusters.clone()
    } else {
        if !config.remote_clusters.is_empty() {
            tracing::warn!(
                remotes = config.remote_clusters.len(),
                "Remote clusters configured but RESOURCE_MANAGER_ENABLE is off, jobs stay local"
            );
        }
        Vec::new()
    };
    let remotes = Arc::new(
        connect_remotes(&delegation_targets, config.scheduling.delegation_timeout)
            .context("Failed to build remote cluster clients")?,
    );
    let source = Arc::new(ClusterSnapshotSource::new(backend.clone(), remotes.clone()));
    let registry = Arc::new(
        ClusterRegistry::new(
            delegation_targets,
            source,
            config.circuit,
            config.scheduling.snapshot_freshness,
            config.scheduling.delegation_timeout,
        )
        .with_local_backend(backend.kind()),
    );
    tracing::info!(clusters = registry.ids().len(), "Cluster registry ready");

    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Arc::new(PgJobStore::new(pool))
        }
        None => {
            tracing::info!("No DATABASE_URL set, keeping jobs in memory");
            Arc::new(MemoryJobStore::new())
        }
    };

    let runner = Arc::new(KubeJobRunner::new(kube, &config.services_namespace));
    let placement = Arc::new(ClusterPlacement::new(runner, remotes, &config.name));
    let manager = Arc::new(ResourceManager::new(
        registry.clone(),
        store,
        placement,
        config.scheduling.clone(),
    ));
    let router = Arc::new(InvocationRouter::new(backend.clone(), manager.clone()));

    // Background loops
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();

    let refresher = RegistryRefresher::new(registry, config.resource_manager_interval);
    let shutdown = shutdown_rx.clone();
    workers.push(tokio::spawn(async move { refresher.run(shutdown).await }));

    let tracker = JobTracker::new(
        manager.clone(),
        config.job_tracker_interval,
        config.job_retention,
    );
    let shutdown = shutdown_rx.clone();
    workers.push(tokio::spawn(async move { tracker.run(shutdown).await }));

    if config.rescheduler_enable {
        let rescheduler =
            ReScheduler::new(manager.clone(), backend.clone(), config.rescheduler_interval);
        let shutdown = shutdown_rx.clone();
        workers.push(tokio::spawn(async move { rescheduler.run(shutdown).await }));
    }

    if backend.kind() == BackendKind::Openfaas && config.openfaas.scaler_enable {
        let scaler = OpenfaasScaler::new(&config.openfaas, config.scheduling.delegation_timeout)
            .context("Failed to configure the OpenFaaS scaler")?;
        let shutdown = shutdown_rx.clone();
        workers.push(tokio::spawn(async move { scaler.run(shutdown).await }));
    }

    // Build router with all API endpoints
    let app = api::create_router(AppState {
        config: config.clone(),
        backend,
        manager,
        router,
    });

    let addr = config.bind_addr();
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!("Background worker panicked: {}", e);
        }
    }

    tracing::info!("Stratus control plane stopped");
    Ok(())
}
