//! Book Monitor - L2 Order Book Handler
//!
//! Connects to an exchange WebSocket feed, rebuilds the order book of every
//! configured instrument and publishes normalized change events to other system
//! components.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use book_monitor::publisher::{run_publisher, EventSink, Publisher};
use book_monitor::reporter::run_snapshot_reporter;
use book_monitor::websocket::{FeedSession, WsConnector};
use book_monitor::{server, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Book Monitor");

    // Load configuration
    let config = Config::load()?;
    info!(
        exchange = %config.exchange,
        symbols = ?config.symbols,
        endpoint = %config.ws_endpoint,
        "Configuration loaded"
    );

    let state = AppState::new(config)?;
    let config = state.config.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Initialize publisher for IPC
    let sink: Arc<dyn EventSink> = Arc::new(Publisher::new(&config.ipc_socket_path).await?);
    let publisher = tokio::spawn(run_publisher(
        state.events.clone(),
        sink.clone(),
        state.metrics.clone(),
    ));

    // Start health check server
    let health_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = server::serve(health_state, config.health_port).await {
            warn!(error = %e, "Health server error");
        }
    });

    // Periodic level snapshots
    let config = state.config.clone();
    let reporter = tokio::spawn(run_snapshot_reporter(
        state.registry.clone(),
        sink,
        config.exchange.name().to_string(),
        config.depth_levels,
        Duration::from_secs(config.snapshot_interval_secs.max(1)),
        shutdown_rx.clone(),
    ));

    // Stop on ctrl-c
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
    let mut session = FeedSession::new(
        config.exchange.adapter(&config.symbols, now),
        Box::new(WsConnector::new(&config.ws_endpoint)),
        state.registry.clone(),
        state.events.clone(),
        state.metrics.clone(),
        config.session(),
    );
    session.run(shutdown_rx).await;

    // Flush queued events before exiting
    state.events.close();
    if let Err(e) = publisher.await {
        warn!(error = %e, "Publisher task failed");
    }
    if let Err(e) = reporter.await {
        warn!(error = %e, "Reporter task failed");
    }

    info!("Book Monitor stopped");
    Ok(())
}
