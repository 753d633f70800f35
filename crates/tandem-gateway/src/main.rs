//! Tandem Gateway Service
//!
//! Sits in front of a Presto coordinator:
//! - `POST /v1/statement` is answered by production and replayed on a shadow
//!   cluster under a correlated query id
//! - `GET|PATCH /proxy/config` reads or hot-swaps the configuration
//! - `GET /metrics` exposes Prometheus metrics
//! - every other request is proxied to production

mod headers;
mod http_api;
mod metrics;
mod passthrough;
mod presto;
mod shadow;
mod state;
mod telemetry;

#[cfg(test)]
mod test_support;

use crate::http_api::AppState;
use crate::shadow::ShadowDispatcher;
use crate::state::RuntimeState;
use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tandem_common::{GatewayConfig, DEFAULT_CONFIG_PATH};
use tracing::{info, warn};

/// In-flight requests get this long to finish after a shutdown signal
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "tandem-gateway")]
#[command(about = "Presto Shadow Proxy - mirror statements onto a shadow cluster")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TANDEM_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    telemetry::init(&args.log_level)?;

    let config = GatewayConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;
    let runtime = Arc::new(RuntimeState::from_config(&config)?);
    let port = runtime.load().config.listen_port();

    let dispatcher = ShadowDispatcher::new();
    let app = http_api::router(AppState {
        runtime,
        dispatcher: dispatcher.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Tandem gateway listening on {}", addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            dispatcher.shutdown();
            return Ok(result??);
        }
        _ = shutdown_signal() => {
            info!("Shutting down shadow proxy...");
        }
    }

    shutdown_tx.send(()).ok();
    match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, &mut server).await {
        Ok(result) => result??,
        Err(_) => {
            warn!(
                "graceful shutdown exceeded {:?}; dropping open connections",
                GRACEFUL_SHUTDOWN_TIMEOUT
            );
            server.abort();
        }
    }

    // outstanding shadow drains end with a logged cancellation
    dispatcher.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
