//! Scan task persistence
//!
//! Status and counter updates are single guarded statements, so concurrent
//! writers never move a task backwards or past its total.

use chrono::Utc;
use mps_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use super::{parse_optional_timestamp, parse_timestamp};
use crate::models::{ScanStatus, ScanTask, SourceSpec};

pub async fn create_task(pool: &SqlitePool, task: &ScanTask) -> Result<i64> {
    let sources = serde_json::to_string(&task.sources)
        .map_err(|e| Error::Internal(format!("Failed to serialize sources: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO scan_tasks (case_id, profile_id, sources, status, scanned_count, total_count, created_at)
        VALUES (?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&task.case_id)
    .bind(task.profile_id)
    .bind(sources)
    .bind(ScanStatus::Pending.as_str())
    .bind(task.total_count as i64)
    .bind(task.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn load_task(pool: &SqlitePool, id: i64) -> Result<Option<ScanTask>> {
    let row = sqlx::query(
        r#"
        SELECT id, case_id, profile_id, sources, status, scanned_count, total_count,
               created_at, started_at, completed_at, aggregate_report, error_message
        FROM scan_tasks
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let sources: String = row.get("sources");
    let sources: Vec<SourceSpec> = serde_json::from_str(&sources)
        .map_err(|e| Error::Internal(format!("Failed to deserialize sources: {}", e)))?;

    let status: String = row.get("status");
    let status = ScanStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown task status '{}'", status)))?;

    let created_at: String = row.get("created_at");

    Ok(Some(ScanTask {
        id: row.get("id"),
        case_id: row.get("case_id"),
        profile_id: row.get("profile_id"),
        sources,
        status,
        scanned_count: row.get::<i64, _>("scanned_count") as u32,
        total_count: row.get::<i64, _>("total_count") as u32,
        created_at: parse_timestamp(&created_at, "created_at")?,
        started_at: parse_optional_timestamp(row.get("started_at"), "started_at")?,
        completed_at: parse_optional_timestamp(row.get("completed_at"), "completed_at")?,
        aggregate_report: row.get("aggregate_report"),
        error_message: row.get("error_message"),
    }))
}

pub async fn mark_in_progress(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE scan_tasks SET status = 'in_progress', started_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn increment_scanned(pool: &SqlitePool, id: i64) -> Result<Option<u32>> {
    let scanned: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE scan_tasks
        SET scanned_count = scanned_count + 1
        WHERE id = ?
          AND scanned_count < total_count
          AND status IN ('pending', 'in_progress')
        RETURNING scanned_count
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(scanned.map(|n| n as u32))
}

pub async fn finish_task(
    pool: &SqlitePool,
    id: i64,
    status: ScanStatus,
    aggregate_report: Option<&str>,
    error_message: Option<&str>,
) -> Result<bool> {
    if !status.is_terminal() {
        return Err(Error::InvalidInput(format!(
            "finish_task requires a terminal status, got {}",
            status
        )));
    }

    let allowed_from = if status == ScanStatus::Completed {
        "status = 'in_progress'"
    } else {
        "status IN ('pending', 'in_progress')"
    };

    let sql = format!(
        r#"
        UPDATE scan_tasks
        SET status = ?,
            completed_at = ?,
            aggregate_report = COALESCE(?, aggregate_report),
            error_message = COALESCE(?, error_message)
        WHERE id = ? AND {}
        "#,
        allowed_from
    );

    let result = sqlx::query(&sql)
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(aggregate_report)
        .bind(error_message)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Fail every task a previous process left `pending` or `in_progress`
pub async fn fail_stale_tasks(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE scan_tasks
        SET status = 'failed',
            completed_at = ?,
            error_message = 'interrupted by service restart'
        WHERE status IN ('pending', 'in_progress')
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    let count = result.rows_affected();
    if count > 0 {
        tracing::warn!(count, "Marked stale scan tasks as failed");
    }
    Ok(count)
}
