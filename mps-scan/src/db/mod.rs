//! SQLite persistence for mps-scan
//!
//! Tables: `target_profiles`, `scan_tasks`, `source_results`, `match_events`.
//! Each table has a module of free functions over a pool; [`SqliteScanStore`]
//! bundles them behind the [`ScanStore`] trait the orchestrator uses.

pub mod matches;
pub mod profiles;
pub mod results;
pub mod tasks;

use async_trait::async_trait;
use mps_common::{Error, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

use crate::models::{MatchEvent, ScanStatus, ScanTask, SourceResult, TargetProfile};

pub use matches::StoredMatch;

/// Persistence operations needed by the orchestrator and the HTTP API
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn save_profile(&self, profile: &TargetProfile) -> Result<i64>;
    async fn load_profile(&self, id: i64) -> Result<Option<TargetProfile>>;

    /// Insert a `pending` task and return its id
    async fn create_task(&self, task: &ScanTask) -> Result<i64>;
    async fn load_task(&self, id: i64) -> Result<Option<ScanTask>>;
    /// `pending → in_progress`; false if the task was not pending
    async fn mark_in_progress(&self, id: i64) -> Result<bool>;
    /// Atomic `scanned_count + 1`, returning the new count; `None` when the
    /// task is terminal or already fully scanned
    async fn increment_scanned(&self, id: i64) -> Result<Option<u32>>;
    /// Move to a terminal status; false if the task was already terminal
    async fn finish_task(
        &self,
        id: i64,
        status: ScanStatus,
        aggregate_report: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool>;

    async fn record_source_result(
        &self,
        task_id: i64,
        position: usize,
        result: &SourceResult,
    ) -> Result<()>;
    /// Results in source-list order
    async fn source_results(&self, task_id: i64) -> Result<Vec<SourceResult>>;

    async fn record_match(&self, task_id: i64, event: &MatchEvent) -> Result<i64>;
    async fn matches_for_task(&self, task_id: i64) -> Result<Vec<StoredMatch>>;

    /// Sum of `detections_found` over the task's source results
    async fn total_detections(&self, task_id: i64) -> Result<u32>;

    /// Fail tasks a previous process left unfinished; returns how many
    async fn fail_stale_tasks(&self) -> Result<u64>;
}

/// [`ScanStore`] over a SQLite pool
#[derive(Clone)]
pub struct SqliteScanStore {
    pool: SqlitePool,
}

impl SqliteScanStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ScanStore for SqliteScanStore {
    async fn save_profile(&self, profile: &TargetProfile) -> Result<i64> {
        profiles::save_profile(&self.pool, profile).await
    }

    async fn load_profile(&self, id: i64) -> Result<Option<TargetProfile>> {
        profiles::load_profile(&self.pool, id).await
    }

    async fn create_task(&self, task: &ScanTask) -> Result<i64> {
        tasks::create_task(&self.pool, task).await
    }

    async fn load_task(&self, id: i64) -> Result<Option<ScanTask>> {
        tasks::load_task(&self.pool, id).await
    }

    async fn mark_in_progress(&self, id: i64) -> Result<bool> {
        tasks::mark_in_progress(&self.pool, id).await
    }

    async fn increment_scanned(&self, id: i64) -> Result<Option<u32>> {
        tasks::increment_scanned(&self.pool, id).await
    }

    async fn finish_task(
        &self,
        id: i64,
        status: ScanStatus,
        aggregate_report: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool> {
        tasks::finish_task(&self.pool, id, status, aggregate_report, error_message).await
    }

    async fn record_source_result(
        &self,
        task_id: i64,
        position: usize,
        result: &SourceResult,
    ) -> Result<()> {
        results::record_source_result(&self.pool, task_id, position, result).await
    }

    async fn source_results(&self, task_id: i64) -> Result<Vec<SourceResult>> {
        results::source_results(&self.pool, task_id).await
    }

    async fn record_match(&self, task_id: i64, event: &MatchEvent) -> Result<i64> {
        matches::record_match(&self.pool, task_id, event).await
    }

    async fn matches_for_task(&self, task_id: i64) -> Result<Vec<StoredMatch>> {
        matches::matches_for_task(&self.pool, task_id).await
    }

    async fn total_detections(&self, task_id: i64) -> Result<u32> {
        results::total_detections(&self.pool, task_id).await
    }

    async fn fail_stale_tasks(&self) -> Result<u64> {
        tasks::fail_stale_tasks(&self.pool).await
    }
}

/// Open (creating if needed) the database file and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database with tables created
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create service tables if missing
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS target_profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            face_embedding BLOB,
            gait_embedding BLOB,
            created_at TEXT NOT NULL,
            CHECK (face_embedding IS NOT NULL OR gait_embedding IS NOT NULL)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            case_id TEXT NOT NULL,
            profile_id INTEGER NOT NULL,
            sources TEXT NOT NULL,
            status TEXT NOT NULL,
            scanned_count INTEGER NOT NULL DEFAULT 0,
            total_count INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            aggregate_report TEXT,
            error_message TEXT,
            CHECK (scanned_count <= total_count)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            source_id TEXT NOT NULL,
            source_name TEXT NOT NULL,
            status TEXT NOT NULL,
            detections_found INTEGER NOT NULL DEFAULT 0,
            frames_processed INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            report_reference TEXT,
            error_message TEXT,
            recorded_at TEXT NOT NULL,
            UNIQUE (task_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS match_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL,
            source_id TEXT NOT NULL,
            frame_index INTEGER NOT NULL,
            track_id INTEGER NOT NULL,
            bbox TEXT NOT NULL,
            face_similarity REAL,
            gait_similarity REAL,
            fused_score REAL,
            matched INTEGER NOT NULL,
            saved_crop_reference TEXT,
            face_backend TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_match_events_task ON match_events(task_id)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (target_profiles, scan_tasks, source_results, match_events)");
    Ok(())
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
    column: &str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    value.map(|v| parse_timestamp(&v, column)).transpose()
}
