//! cpuplaned - node-local CPU pinning control plane daemon.
//!
//! Serves the `cpuplane.v1.ControlPlane` gRPC API and pins pod containers to
//! CPUs through the host's cpuset cgroup controller.

mod api;
mod config;

use anyhow::Context;
use clap::Parser;
use config::Config;
use cpuplane_lib::cgroup::{self, CpusetWriter};
use cpuplane_lib::proto::control_plane_server::ControlPlaneServer;
use cpuplane_lib::{ControlPlaneService, Daemon, DaemonState, StaticPolicy};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = Config::parse();
    config.validate()?;

    let mode = cgroup::detect_mode(&config.cgroup_path).await;
    info!(?mode, cgroup_path = %config.cgroup_path.display(), "detected cgroup hierarchy");

    let state = DaemonState::new(
        &config.cgroup_path,
        mode,
        &config.topology_path,
        &config.state_path,
    )
    .await?;
    info!(
        cpus = state.topology.cpu_info.len(),
        pods = state.pods.len(),
        "daemon state ready"
    );

    let writer = Arc::new(CpusetWriter::new(
        config.runtime,
        config.cgroup_driver,
        mode,
        config.cgroup_sub_path.clone(),
    ));
    let allocator = config.build_allocator(writer);
    let daemon = Arc::new(Mutex::new(Daemon::new(state, StaticPolicy::new(allocator))));
    let service = ControlPlaneService::new(daemon);

    tokio::spawn(api::serve(config.api_port));

    let addr = format!("0.0.0.0:{}", config.port)
        .parse()
        .context("invalid listen address")?;
    info!(%addr, "control plane listening");
    tonic::transport::Server::builder()
        .add_service(ControlPlaneServer::new(service))
        .serve_with_shutdown(addr, shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM; tonic finishes the in-flight request
/// before the server future completes.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::error!(%err, "cannot install SIGTERM handler");
            return std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down"),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
    }
}
