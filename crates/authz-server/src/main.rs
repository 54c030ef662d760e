mod app;
mod error;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use control_plane::load_from_system_config;
use kernel::{CacheRefresher, Kernel, KernelConfig, RefresherConfig, RequestGate, ShutdownManager};
use tracing::{info, warn};

use crate::state::{create_default_config, load_config, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "authz.toml")]
    config: PathBuf,
    /// Overrides `server.listen`.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if !args.config.exists() {
        warn!("config file missing, creating default config");
        let _ = create_default_config(&args.config);
    }

    let config = load_config(&args.config)?;
    let listen = match args.listen {
        Some(listen) => listen,
        None => config.get_string("server.listen").parse()?,
    };
    let grace = config.get_millis("shutdown.grace_ms");

    let mut bundle = load_from_system_config(&config)?;
    let kernel = Arc::new(Kernel::new(
        KernelConfig::from_system_config(&config),
        bundle.cache.clone(),
        bundle.revocations.clone(),
        bundle.audit.clone(),
    ));
    let refresher = CacheRefresher::shared(
        bundle.cache.clone(),
        bundle.source.clone(),
        RefresherConfig::from_system_config(&config),
    );

    let attempts = config.get_number("replication.prime_attempts").max(0) as u32;
    let backoff = config.get_millis("replication.prime_backoff_ms");
    refresher.prime(attempts, backoff).await?;
    let refresher_task = tokio::spawn(refresher.clone().run());

    let gate = RequestGate::shared();
    let shutdown = ShutdownManager::shared(grace);
    {
        let gate = gate.clone();
        shutdown.register("stop accepting requests", move || async move {
            gate.stop_accepting_requests();
        });
    }
    {
        let gate = gate.clone();
        shutdown.register("drain in-flight requests", move || async move {
            if !gate.drain(grace).await {
                warn!(in_flight = gate.in_flight(), "requests still in flight after grace period");
            }
        });
    }
    {
        let refresher = refresher.clone();
        shutdown.register("close replication", move || async move {
            refresher.stop();
            if let Err(err) = refresher_task.await {
                warn!(error = %err, "refresher task ended abnormally");
            }
        });
    }
    if let Some(worker) = bundle.audit_worker.take() {
        shutdown.register("flush audit", move || async move {
            worker.close(grace).await;
        });
    }

    let state = Arc::new(AppState {
        kernel,
        cache: bundle.cache.clone(),
        refresher,
        gate,
        local_source: bundle.local_source.clone(),
        admin_token: config.get_string("server.admin_token"),
    });
    let app = app::build_router(state);

    info!("authz-server listening on {}", listen);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

async fn shutdown_signal(shutdown: Arc<ShutdownManager>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
    shutdown.shutdown().await;
}
