//! mothership-relay daemon entry point.
//!
//! Starts the relay connection manager, the status reporter, and the
//! optional loopback status API, then runs until interrupted.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mothership_relay::api;
use mothership_relay::app_state::AppState;
use mothership_relay::config::RelayConfig;
use mothership_relay::domain::{LinkMetadata, MirrorCache, TransitionBus};
use mothership_relay::relay::{ConnectionManager, RelayHandle};
use mothership_relay::status::StatusReporter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = Arc::new(RelayConfig::from_env()?);
    tracing::info!(relay = %config.relay_url, "starting mothership-relay");

    // Build domain layer
    let bus = TransitionBus::new(config.event_bus_capacity);
    let mirror = MirrorCache::new();
    let metadata = LinkMetadata::new();

    // Status reporter subscribes before the manager can transition
    let shutdown = CancellationToken::new();
    let reporter = StatusReporter::new(&config, bus.clone(), metadata.clone())
        .spawn(shutdown.clone());

    let outcome = run(config, bus, mirror, metadata, &shutdown).await;

    // The reporter deletes the status file on every exit path
    shutdown.cancel();
    if let Err(e) = reporter.await {
        tracing::error!(error = %e, "status reporter task failed");
    }
    if let Err(e) = &outcome {
        tracing::error!(error = %e, "mothership-relay exiting with error");
    }
    outcome
}

/// Runs the connection manager until a shutdown signal, then stops it.
async fn run(
    config: Arc<RelayConfig>,
    bus: TransitionBus,
    mirror: MirrorCache,
    metadata: LinkMetadata,
    shutdown: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = ConnectionManager::new(
        Arc::clone(&config),
        bus.clone(),
        mirror.clone(),
        metadata.clone(),
    )?;
    let (relay, manager_task) = manager.spawn();

    let state = AppState {
        relay: relay.clone(),
        bus,
        metadata,
        mirror,
    };
    let served = serve_until_signal(&config, &relay, state, shutdown).await;

    // Already stopped is fine; the join below reports real failures
    let _ = relay.shutdown();
    manager_task.await?;
    served
}

/// Connects, serves the optional status API, and waits for a signal.
async fn serve_until_signal(
    config: &RelayConfig,
    relay: &RelayHandle,
    state: AppState,
    shutdown: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.auto_connect {
        relay.connect()?;
    }

    // Optional loopback status API
    let stop = shutdown.child_token();
    let server = match config.status_listen_addr {
        Some(addr) => {
            let app = api::build_router(state);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(%addr, "status api listening");
            let stop = stop.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { stop.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    wait_for_signal().await;
    tracing::info!("shutting down");

    stop.cancel();
    if let Some(server) = server {
        server.await??;
    }
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
