use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{routing::get, Router};
use clap::Parser;
use relay_core::{chain, metrics, BeaconClient, RelayConfig};
use server::{handlers::AppState, middleware::auth::AuthVerifier, router};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Grace period for in-flight requests after a shutdown signal.
const GRACEFUL_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "beacon-relay", version)]
#[command(about = "Public HTTP relay in front of a pool of beacon nodes")]
struct Cli {
    /// HTTP listen address for the public API.
    #[arg(long, default_value = "localhost:8080")]
    bind: String,

    /// HTTP listen address for the Prometheus metrics endpoint.
    #[arg(long, default_value = "localhost:9999")]
    metrics: String,

    /// Comma-separated, ordered backend host:port list; the first entry
    /// is the preferred node, the rest are fallbacks.
    #[arg(long = "grpc-connect", default_value = "localhost:4444")]
    grpc_connect: String,

    /// Guard v2 routes with bearer-token verification using the secret
    /// from the AUTH_TOKEN environment variable.
    #[arg(long)]
    enable_auth: bool,

    /// Milliseconds subtracted from the wait before fetching an imminent
    /// round, to compensate for network latency.
    #[arg(long, default_value_t = 0)]
    frontrun: i64,

    /// Print as many logs as possible.
    #[arg(long)]
    verbose: bool,

    /// Print logs in JSON format.
    #[arg(long)]
    json: bool,

    /// Deprecated, ignored.
    #[arg(long, hide = true)]
    insecure: bool,

    /// Deprecated, ignored.
    #[arg(long, hide = true)]
    hash_list: Option<String>,
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,relay_core={default_level},server={default_level}"
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);

    if cli.insecure || cli.hash_list.is_some() {
        warn!("--insecure and --hash-list are deprecated and ignored");
    }

    let prometheus = metrics::init_prometheus();

    let config = RelayConfig::from_flags(
        cli.bind,
        cli.metrics,
        cli.grpc_connect,
        cli.enable_auth,
        cli.frontrun,
    );

    let client = match BeaconClient::new(&config).await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, backends = %config.backends, "failed to reach any backend");
            std::process::exit(1);
        }
    };
    info!(client = %client, "starting http relay");

    let auth = if config.enable_auth {
        let verifier = AuthVerifier::from_env();
        if verifier.is_none() {
            warn!("authentication requested but no usable secret, v2 routes stay open");
        }
        verifier.map(Arc::new)
    } else {
        None
    };

    // metrics listener, separate from the public surface
    let metrics_app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = prometheus.clone();
            async move { handle.render() }
        }),
    );
    let metrics_listener = tokio::net::TcpListener::bind(&config.metrics_bind).await?;
    info!(address = %config.metrics_bind, "metrics listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            error!(error = %e, "metrics server error");
        }
    });

    let state = Arc::new(AppState {
        client,
        frontrun: config.frontrun,
        clock: chain::system_clock,
    });
    let app = router::create_router(Arc::clone(&state), auth);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!(address = %config.bind, "relay listening");

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    state.client.close();
    info!("beacon relay stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM, then arms a watchdog that force-exits
/// if draining outlives the grace period.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(
        "shutdown signal received, draining for up to {}s",
        GRACEFUL_SHUTDOWN_TIMEOUT_SECS
    );
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(GRACEFUL_SHUTDOWN_TIMEOUT_SECS)).await;
        error!("graceful shutdown timed out, forcing exit");
        std::process::exit(1);
    });
}
