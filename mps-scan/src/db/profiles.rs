//! Target profile persistence
//!
//! Embeddings are stored as little-endian `f32` BLOBs.

use chrono::Utc;
use mps_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::TargetProfile;

pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Internal(format!(
            "Embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub async fn save_profile(pool: &SqlitePool, profile: &TargetProfile) -> Result<i64> {
    let face = profile.face().map(encode_embedding);
    let gait = profile.gait().map(encode_embedding);

    let result = sqlx::query(
        r#"
        INSERT INTO target_profiles (name, face_embedding, gait_embedding, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(profile.name())
    .bind(face)
    .bind(gait)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn load_profile(pool: &SqlitePool, id: i64) -> Result<Option<TargetProfile>> {
    let row = sqlx::query(
        "SELECT name, face_embedding, gait_embedding FROM target_profiles WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let name: String = row.get("name");
    let face: Option<Vec<u8>> = row.get("face_embedding");
    let gait: Option<Vec<u8>> = row.get("gait_embedding");
    let face = face.as_deref().map(decode_embedding).transpose()?;
    let gait = gait.as_deref().map(decode_embedding).transpose()?;

    TargetProfile::new(name, face, gait)
        .map(Some)
        .map_err(|e| Error::Internal(format!("Stored profile {} is unusable: {}", id, e)))
}
