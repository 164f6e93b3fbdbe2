//! Per-source result persistence

use chrono::Utc;
use mps_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::{SourceResult, SourceStatus};

/// Record the outcome for the source at `position`; a second write for the
/// same position is ignored
pub async fn record_source_result(
    pool: &SqlitePool,
    task_id: i64,
    position: usize,
    result: &SourceResult,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO source_results (
            task_id, position, source_id, source_name, status, detections_found,
            frames_processed, duration_ms, report_reference, error_message, recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(task_id, position) DO NOTHING
        "#,
    )
    .bind(task_id)
    .bind(position as i64)
    .bind(&result.source_id)
    .bind(&result.source_name)
    .bind(result.status.as_str())
    .bind(result.detections_found as i64)
    .bind(result.frames_processed as i64)
    .bind(result.duration_ms as i64)
    .bind(&result.report_reference)
    .bind(&result.error_message)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn source_results(pool: &SqlitePool, task_id: i64) -> Result<Vec<SourceResult>> {
    let rows = sqlx::query(
        r#"
        SELECT source_id, source_name, status, detections_found, frames_processed,
               duration_ms, report_reference, error_message
        FROM source_results
        WHERE task_id = ?
        ORDER BY position
        "#,
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let status: String = row.get("status");
            let status = SourceStatus::parse(&status)
                .ok_or_else(|| Error::Internal(format!("Unknown source status '{}'", status)))?;
            Ok(SourceResult {
                source_id: row.get("source_id"),
                source_name: row.get("source_name"),
                status,
                detections_found: row.get::<i64, _>("detections_found") as u32,
                frames_processed: row.get::<i64, _>("frames_processed") as u64,
                duration_ms: row.get::<i64, _>("duration_ms") as u64,
                report_reference: row.get("report_reference"),
                error_message: row.get("error_message"),
            })
        })
        .collect()
}

pub async fn total_detections(pool: &SqlitePool, task_id: i64) -> Result<u32> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(detections_found), 0) FROM source_results WHERE task_id = ?",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await?;

    Ok(total as u32)
}
