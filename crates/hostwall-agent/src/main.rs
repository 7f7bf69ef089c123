//! hostwall - Main Entry Point

use anyhow::Context;
use hostwall_agent::{Agent, AgentConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("hostwall v{}", env!("CARGO_PKG_VERSION"));

    // Load config
    let config_path = AgentConfig::locate(std::env::args().skip(1));
    let config = AgentConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let agent = Arc::new(Agent::new(config).context("building firewall")?);
    let stats = run(agent.clone()).await?;

    tracing::info!(
        received = stats.received,
        accepted = stats.accepted,
        dropped = stats.dropped,
        fallbacks = stats.fallbacks,
        "queue statistics"
    );
    agent.report();
    Ok(())
}

#[cfg(target_os = "linux")]
async fn run(agent: Arc<Agent>) -> anyhow::Result<hostwall_dataplane::AdapterStats> {
    let queue = agent.open_queue().context("binding NFQUEUE")?;
    let mut adapter = agent.adapter(queue)?;
    let shutdown = adapter.shutdown_handle();

    // The adapter owns the netlink socket on a blocking thread
    let mut worker = tokio::task::spawn_blocking(move || adapter.run());

    tokio::select! {
        () = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            request_stop(&shutdown);
            Ok(worker.await??)
        }
        result = &mut worker => {
            Ok(result??)
        }
    }
}

#[cfg(not(target_os = "linux"))]
async fn run(_agent: Arc<Agent>) -> anyhow::Result<hostwall_dataplane::AdapterStats> {
    anyhow::bail!("NFQUEUE requires Linux")
}

fn request_stop(flag: &AtomicBool) {
    flag.store(true, Ordering::Release);
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
