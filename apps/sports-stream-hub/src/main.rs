//! Sports Stream Hub Binary
//!
//! Starts the fan-out hub.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin sports-stream-hub
//! ```
//!
//! # Environment Variables (all optional)
//!
//! - `SWARM_WS_URL`: Upstream feed WebSocket URL
//! - `SWARM_SITE_ID`: Partner site id for the session handshake
//! - `SWARM_LANGUAGE`: Handshake language (default: eng)
//! - `TRACKER_WS_URL`: Live-tracker feed WebSocket URL
//! - `TRACKER_PARTNER_ID`: Live-tracker partner id
//! - `TRACKER_SITE_REF`: Live-tracker site reference
//! - `HUB_HTTP_PORT`: HTTP/SSE port (default: 8787)
//! - `HUB_DATA_DIR`: Durable state directory (default: ./data)
//! - `HUB_GRACE_SECS`: Idle-group grace window (default: 30)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sports_stream_hub::infrastructure::telemetry;
use sports_stream_hub::{
    AppState, FileStore, GroupManager, HierarchyCache, HubConfig, MetricsAggregator,
    SubscriptionRegistry, SwarmSession, TrackerManager, init_metrics, router,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting sports stream hub");

    let _metrics_handle = init_metrics();

    let config = HubConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Durable storage + coalescing flusher
    let storage = Arc::new(FileStore::open(&config.storage.data_dir).await?);
    tokio::spawn(
        Arc::clone(&storage).run_flusher(config.storage.flush_interval, shutdown_token.clone()),
    );

    // Upstream session
    let registry = Arc::new(SubscriptionRegistry::new());
    let session = Arc::new(SwarmSession::new(
        config.swarm.clone(),
        config.websocket.clone(),
        config.timeouts.clone(),
        Arc::clone(&registry),
        shutdown_token.clone(),
    ));
    let session_task = Arc::clone(&session);
    tokio::spawn(async move {
        if let Err(e) = session_task.run().await {
            tracing::error!(error = %e, "swarm session stopped");
        }
    });

    // Taxonomy cache, warmed in the background once the session is up
    let hierarchy = Arc::new(HierarchyCache::new(Arc::clone(&session), Arc::clone(&storage)));
    let hierarchy_warmup = Arc::clone(&hierarchy);
    tokio::spawn(async move {
        match hierarchy_warmup.document(false).await {
            Ok((_, cached)) => tracing::info!(cached, "hierarchy warm"),
            Err(e) => tracing::warn!(error = %e, "hierarchy warmup failed"),
        }
    });

    // Tracker metrics aggregator
    let aggregator = Arc::new(MetricsAggregator::new(Arc::clone(&storage)));

    // Fan-out groups
    let groups = Arc::new(GroupManager::new(
        Arc::clone(&session),
        Arc::clone(&hierarchy),
        config.groups.clone(),
        shutdown_token.clone(),
    ));
    tokio::spawn(Arc::clone(&groups).run_janitor());

    // Live-tracker proxy
    let tracker = Arc::new(TrackerManager::new(
        config.tracker.clone(),
        config.websocket.clone(),
        Arc::clone(&aggregator),
        config.groups.client_buffer,
        shutdown_token.clone(),
    ));

    // HTTP/SSE edge
    let state: Arc<AppState> = Arc::new(AppState {
        session,
        groups,
        tracker,
        hierarchy,
        aggregator,
        client_buffer: config.groups.client_buffer,
        started_at: Instant::now(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.http_port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "HTTP edge listening");

    let app = router(state);
    let server_shutdown = shutdown_token.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Hub ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, server).await.is_err() {
        tracing::warn!("HTTP server did not stop within the shutdown timeout");
    }

    tracing::info!("Hub stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        swarm_url = %config.swarm.url,
        tracker_url = %config.tracker.url,
        grace_secs = config.groups.grace.as_secs(),
        data_dir = %config.storage.data_dir.display(),
        "Configuration loaded"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
