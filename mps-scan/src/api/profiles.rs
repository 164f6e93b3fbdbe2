//! Target profile API handlers
//!
//! POST /profiles, GET /profiles/{id}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    models::TargetProfile,
    AppState,
};

/// POST /profiles request
#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub name: String,
    #[serde(default)]
    pub face_embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub gait_embedding: Option<Vec<f32>>,
}

/// Profile summary; embeddings are reported by dimension only
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub profile_id: i64,
    pub name: String,
    pub face_dimensions: Option<usize>,
    pub gait_dimensions: Option<usize>,
}

impl ProfileSummary {
    fn new(profile_id: i64, profile: &TargetProfile) -> Self {
        Self {
            profile_id,
            name: profile.name().to_string(),
            face_dimensions: profile.face().map(<[f32]>::len),
            gait_dimensions: profile.gait().map(<[f32]>::len),
        }
    }
}

/// POST /profiles
///
/// 400 when neither embedding is present or a vector has non-finite values.
pub async fn create_profile(
    State(state): State<AppState>,
    Json(request): Json<CreateProfileRequest>,
) -> ApiResult<(StatusCode, Json<ProfileSummary>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Profile name must not be empty".to_string()));
    }
    for (label, vector) in [("face", &request.face_embedding), ("gait", &request.gait_embedding)] {
        if vector.as_ref().is_some_and(|v| v.iter().any(|x| !x.is_finite())) {
            return Err(ApiError::BadRequest(format!(
                "{} embedding contains non-finite values",
                label
            )));
        }
    }

    let profile = TargetProfile::new(request.name, request.face_embedding, request.gait_embedding)?;
    let profile_id = state.store.save_profile(&profile).await?;

    tracing::info!(
        profile_id,
        name = profile.name(),
        has_face = profile.face().is_some(),
        has_gait = profile.gait().is_some(),
        "Target profile created"
    );

    Ok((StatusCode::CREATED, Json(ProfileSummary::new(profile_id, &profile))))
}

/// GET /profiles/{id}
pub async fn get_profile(
    State(state): State<AppState>,
    Path(profile_id): Path<i64>,
) -> ApiResult<Json<ProfileSummary>> {
    let profile = state
        .store
        .load_profile(profile_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Target profile not found: {}", profile_id)))?;

    Ok(Json(ProfileSummary::new(profile_id, &profile)))
}

/// Build profile routes
pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/profiles", post(create_profile))
        .route("/profiles/:id", get(get_profile))
}
