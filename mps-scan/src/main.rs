//! mps-scan - Multi-source Person Scan service
//!
//! Scans ordered lists of camera sources for one target person using face
//! and gait evidence, and reports progress over HTTP REST + SSE.

use anyhow::{Context, Result};
use clap::Parser;
use mps_common::config::{
    default_config_path, load_toml_or_default, resolve_root_folder, RootFolder, ROOT_FOLDER_ENV,
};
use mps_common::events::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mps_scan::capabilities::{
    FallbackFaceEmbedder, FsSnapshotStore, IouTracker, IouTrackerConfig, JsonReporter,
    JsonlAuditSink, LogNotifier, MediaSourceOpener, Notifier, PipelineCapabilities, Tracker,
    UnconfiguredDetector, WebhookNotifier,
};
use mps_scan::config::ScanServiceConfig;
use mps_scan::db::{init_database_pool, ScanStore, SqliteScanStore};
use mps_scan::orchestrator::ScanOrchestrator;
use mps_scan::AppState;

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "mps-scan", version, about = "Multi-source person scan service")]
struct Args {
    /// Root folder holding the database and artifacts
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: ~/.config/mps/mps-scan.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| default_config_path("mps-scan"));
    let mut config: ScanServiceConfig = match &config_path {
        Some(path) => load_toml_or_default(path)?,
        None => ScanServiceConfig::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting mps-scan (Multi-source Person Scan) service");
    info!(
        "Version: {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("MPS_GIT_HASH"),
        env!("MPS_BUILD_TIMESTAMP"),
        env!("MPS_BUILD_PROFILE")
    );

    let root = RootFolder::new(resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config.root_folder.as_deref(),
    ));
    root.ensure_exists()
        .with_context(|| format!("Failed to initialize root folder {}", root.path().display()))?;
    info!("Root folder: {}", root.path().display());

    let db_path = root.database_path();
    info!("Database: {}", db_path.display());
    let pool = init_database_pool(&db_path).await?;
    let store = Arc::new(SqliteScanStore::new(pool));

    let stale = store.fail_stale_tasks().await?;
    if stale > 0 {
        warn!("Marked {} unfinished scan task(s) from a previous run as failed", stale);
    }

    let event_bus = EventBus::new(config.scan.event_channel_capacity);

    let tracker_config = IouTrackerConfig::default();
    let caps = PipelineCapabilities {
        detector: Arc::new(UnconfiguredDetector),
        trackers: Arc::new(move || Box::new(IouTracker::new(tracker_config)) as Box<dyn Tracker>),
        face: Arc::new(FallbackFaceEmbedder::disabled()),
        gait: None,
        frames: Arc::new(MediaSourceOpener::standard()),
        snapshots: Arc::new(FsSnapshotStore::new(
            root.subdir(&config.storage.snapshots_dir)?,
            root.subdir(&config.storage.detections_dir)?,
        )),
        audit: Arc::new(JsonlAuditSink::new(root.subdir(&config.storage.audit_dir)?)),
        events: Arc::new(event_bus.clone()),
    };
    warn!("No detector backend configured; every source will end as an error until one is wired in");

    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => {
            let timeout = Duration::from_secs(config.notify.timeout_secs.unwrap_or(10));
            info!("Notifications: webhook {}", url);
            Arc::new(WebhookNotifier::new(url.clone(), timeout)?)
        }
        None => {
            info!("Notifications: log only");
            Arc::new(LogNotifier)
        }
    };

    let orchestrator = Arc::new(ScanOrchestrator::new(
        store,
        Arc::new(JsonReporter::new(root.subdir(&config.storage.reports_dir)?)),
        notifier,
        caps,
        config.matching.clone(),
        config.scan.clone(),
    ));
    info!(
        "Scan workers: {} concurrent, source deadline {}s",
        config.scan.max_concurrent_scans, config.scan.source_timeout_secs
    );

    let state = AppState::new(orchestrator, event_bus);
    let app = mps_scan::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
