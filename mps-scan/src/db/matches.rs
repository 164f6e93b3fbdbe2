//! Match event persistence (append-only)

use mps_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use super::parse_timestamp;
use crate::models::{BBox, MatchEvent};

/// A persisted match with its row id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMatch {
    pub id: i64,
    pub task_id: i64,
    #[serde(flatten)]
    pub event: MatchEvent,
}

pub async fn record_match(pool: &SqlitePool, task_id: i64, event: &MatchEvent) -> Result<i64> {
    let bbox = serde_json::to_string(&event.bbox)
        .map_err(|e| Error::Internal(format!("Failed to serialize bbox: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO match_events (
            task_id, source_id, frame_index, track_id, bbox, face_similarity,
            gait_similarity, fused_score, matched, saved_crop_reference, face_backend, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(task_id)
    .bind(&event.source_id)
    .bind(event.frame_index as i64)
    .bind(event.track_id)
    .bind(bbox)
    .bind(event.face_similarity)
    .bind(event.gait_similarity)
    .bind(event.fused_score)
    .bind(event.matched)
    .bind(&event.saved_crop_reference)
    .bind(&event.face_backend)
    .bind(event.timestamp.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn matches_for_task(pool: &SqlitePool, task_id: i64) -> Result<Vec<StoredMatch>> {
    let rows = sqlx::query(
        r#"
        SELECT id, task_id, source_id, frame_index, track_id, bbox, face_similarity,
               gait_similarity, fused_score, matched, saved_crop_reference, face_backend, created_at
        FROM match_events
        WHERE task_id = ?
        ORDER BY id
        "#,
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let bbox: String = row.get("bbox");
            let bbox: BBox = serde_json::from_str(&bbox)
                .map_err(|e| Error::Internal(format!("Failed to deserialize bbox: {}", e)))?;
            let created_at: String = row.get("created_at");

            Ok(StoredMatch {
                id: row.get("id"),
                task_id: row.get("task_id"),
                event: MatchEvent {
                    source_id: row.get("source_id"),
                    frame_index: row.get::<i64, _>("frame_index") as u64,
                    track_id: row.get("track_id"),
                    bbox,
                    face_similarity: row.get("face_similarity"),
                    gait_similarity: row.get("gait_similarity"),
                    fused_score: row.get("fused_score"),
                    matched: row.get("matched"),
                    saved_crop_reference: row.get("saved_crop_reference"),
                    face_backend: row.get("face_backend"),
                    timestamp: parse_timestamp(&created_at, "created_at")?,
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use chrono::Utc;

    fn event(frame_index: u64) -> MatchEvent {
        MatchEvent {
            source_id: "cam-1".into(),
            frame_index,
            track_id: 2,
            bbox: BBox::new(1.0, 2.0, 3.0, 4.0),
            face_similarity: Some(0.8),
            gait_similarity: None,
            fused_score: Some(0.8),
            matched: true,
            saved_crop_reference: Some("/m/1.jpg".into()),
            face_backend: Some("fast".into()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_list() {
        let pool = init_memory_pool().await.unwrap();
        let first = record_match(&pool, 4, &event(10)).await.unwrap();
        let second = record_match(&pool, 4, &event(11)).await.unwrap();
        record_match(&pool, 5, &event(1)).await.unwrap();
        assert!(second > first);

        let stored = matches_for_task(&pool, 4).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].id, first);
        assert_eq!(stored[1].event.frame_index, 11);
        assert_eq!(stored[0].event.bbox, BBox::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(stored[0].event.gait_similarity, None);
        assert!(stored[0].event.matched);

        let json = serde_json::to_value(&stored[0]).unwrap();
        assert_eq!(json["task_id"], 4);
        assert_eq!(json["source_id"], "cam-1");
    }
}
