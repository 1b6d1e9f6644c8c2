//! CPU Advisor - node-level CPU advisory service
//!
//! This binary runs as a DaemonSet on each Kubernetes node, pulling
//! checkpoints from the CPU plugin and streaming CPU advice back to it.

use advisor_lib::{
    advisor::{ReclaimHeadroom, StaticAdvisor},
    assembler::Assembler,
    cache::InMemoryMetaCache,
    grpc::{serve_uds, CpuAdvisorService, UdsPluginConnector},
    health::{components, HealthRegistry},
    metadata::{AnnotationQosClassifier, KubeletPodFetcher},
    observability::{AdvisorMetrics, StructuredLogger},
    server::CpuServer,
};
use anyhow::Result;
use cpu_advisor::{api, config};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ADVISOR_VERSION: &str = env!("CARGO_PKG_VERSION");

async fn wait_for_stop(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cpu-advisor");

    let config = config::AdvisorConfig::load()?;
    info!(node_name = %config.node_name, "Advisor configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::GRPC_SERVER).await;

    let metrics = AdvisorMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(
        ADVISOR_VERSION,
        &config.advisor_socket_path,
        &config.plugin_socket_path,
    );

    let (stop_tx, stop_rx) = watch::channel(false);

    let cache = Arc::new(InMemoryMetaCache::new());
    let pods = Arc::new(
        KubeletPodFetcher::new(config.kubelet_endpoint.clone(), config.kubelet_timeout())?
            .with_refresh_interval(config.kubelet_refresh()),
    );
    let advisor = Arc::new(StaticAdvisor::new(
        cache.clone(),
        config.allow_shared_overlap_reclaimed,
    ));
    let assembler = Assembler::new().with_headroom(Arc::new(ReclaimHeadroom::new(cache.clone())));

    let server = CpuServer::builder()
        .config(config.server_config())
        .cache(cache)
        .pod_fetcher(pods)
        .qos_classifier(Arc::new(AnnotationQosClassifier))
        .advisor(advisor)
        .assembler(assembler)
        .health(health_registry.clone())
        .node_name(config.node_name.clone())
        .stop_signal(stop_rx.clone())
        .build()?;

    let connector = Arc::new(UdsPluginConnector::new(
        config.plugin_socket_path.clone(),
        config.period(),
    ));
    let service = CpuAdvisorService::new(Arc::new(server), connector);

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        wait_for_stop(stop_rx.clone()),
    ));

    let grpc_handle = tokio::spawn(serve_uds(
        service,
        config.advisor_socket_path.clone(),
        health_registry.clone(),
        wait_for_stop(stop_rx),
    ));

    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    let _ = stop_tx.send(true);

    match grpc_handle.await {
        Ok(Err(e)) => error!(error = %e, "gRPC server exited with error"),
        Err(e) => error!(error = %e, "gRPC server task panicked"),
        Ok(Ok(())) => {}
    }
    if let Ok(Err(e)) = api_handle.await {
        error!(error = %e, "API server exited with error");
    }
    info!("Shutting down");

    Ok(())
}
