//! Level routes: explicit creation (used by workspace bootstrap) and the
//! periodic editor snapshot save. Advancement itself happens inside the chat
//! pipeline, not here.

use crate::auth::resolve_identity;
use crate::handlers::ApiError;
use crate::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use dojo_core::GatewayError;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLevelRequest {
    pub workspace_id: String,
    pub step_number: i64,
    pub task_title: String,
    #[serde(default)]
    pub code_snapshot: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLevelRequest {
    pub workspace_id: String,
    pub step_number: i64,
    pub code_snapshot: String,
}

pub async fn create_level(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateLevelRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let identity = resolve_identity(&state.store, &headers)?;
    if state
        .store
        .find_owned(&req.workspace_id, &identity.user_id)?
        .is_none()
    {
        return Err(GatewayError::TenantIsolation.into());
    }

    let level = state.store.create_level(
        &req.workspace_id,
        req.step_number,
        &req.task_title,
        &req.code_snapshot,
        req.language.as_deref().unwrap_or("javascript"),
    )?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "level": level })),
    ))
}

/// Snapshot-only update; the title, step number and language of an existing
/// level never change through this route.
pub async fn update_level(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateLevelRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let identity = resolve_identity(&state.store, &headers)?;
    if state
        .store
        .find_owned(&req.workspace_id, &identity.user_id)?
        .is_none()
    {
        return Err(GatewayError::TenantIsolation.into());
    }

    let changed =
        state
            .store
            .update_level_snapshot(&req.workspace_id, req.step_number, &req.code_snapshot)?;
    if !changed {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Level not found" })),
        ));
    }
    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}
