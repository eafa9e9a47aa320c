//! muxbot-monitor - live peak monitor
//!
//! Polls a captured dashboard page for the concurrent-viewers metric,
//! keeps the peak in the remote spreadsheet current, and serves a small
//! status API (`/health`, `/status`, `/events`).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use muxbot_common::config::{load_toml_config, log_filter, RootFolderInitializer};
use muxbot_common::EventBus;
use muxbot_monitor::config::{Args, MonitorSettings, MODULE_NAME};
use muxbot_monitor::gateway::{MemorySheet, RelayGateway, TableGateway};
use muxbot_monitor::records::{AirtableClient, RecordSource, UnconfiguredSource};
use muxbot_monitor::sampler::SnapshotFileSampler;
use muxbot_monitor::store::SqliteStore;
use muxbot_monitor::{build_router, db, AppState, Monitor, MonitoredSession, PeakEngine, SheetClient};
use tokio::signal;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

const EVENT_BUS_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before the level it carries can be applied
    let toml_config = tracing::subscriber::with_default(tracing_subscriber::fmt().finish(), || {
        load_toml_config(MODULE_NAME, args.config.as_deref())
    });

    // RUST_LOG wins over [logging] level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_filter(&toml_config))),
        )
        .init();

    info!("Starting MuxBot peak monitor (muxbot-monitor) v{}", env!("CARGO_PKG_VERSION"));

    let settings = MonitorSettings::resolve(&args, &toml_config).context("Invalid configuration")?;

    let initializer = RootFolderInitializer::new(settings.root_folder.clone());
    initializer.ensure_directory_exists()?;
    let db_path = initializer.database_path();
    info!("Database path: {}", db_path.display());

    let pool = match db::init_database_pool(&db_path).await {
        Ok(pool) => {
            info!("✓ Connected to database");
            pool
        }
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };
    let store = Arc::new(SqliteStore::new(pool));

    let gateway: Arc<dyn TableGateway> = if settings.dry_run {
        warn!("Dry run: writes go to an in-memory sheet");
        Arc::new(MemorySheet::new())
    } else {
        Arc::new(RelayGateway::new(settings.relay_token.clone()).context("Failed to build relay client")?)
    };
    let sheet = SheetClient::new(gateway, settings.webhook_url.clone());

    let records: Arc<dyn RecordSource> = match settings.records.clone() {
        Some(record_settings) => {
            Arc::new(AirtableClient::new(record_settings).context("Failed to build record client")?)
        }
        None => {
            warn!("Record table not configured; enrichment will degrade to peak-only writes");
            Arc::new(UnconfiguredSource)
        }
    };

    let session = MonitoredSession::new(settings.event_ids.clone());
    info!(
        session_key = %session.session_key,
        snapshot = %settings.snapshot.display(),
        interval_ms = settings.poll_interval.as_millis() as u64,
        "Session configured"
    );

    let engine = PeakEngine::new(sheet.clone(), records, store);
    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let status = Arc::new(RwLock::new(None));
    let monitor = Monitor::new(
        session,
        engine,
        Arc::new(SnapshotFileSampler::new(settings.snapshot.clone())),
        status.clone(),
        event_bus.clone(),
        settings.poll_interval,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = tokio::spawn(monitor.run(wait_for_shutdown(shutdown_rx.clone())));

    let app = build_router(AppState::new(status, event_bus, sheet));
    let addr = SocketAddr::from(([127, 0, 0, 1], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("muxbot-monitor listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await
        .context("Server error")?;

    if let Err(e) = monitor_task.await {
        error!("Monitor task ended abnormally: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
