//! Workspace CRUD. Every route resolves identity first; reads and writes are
//! both scoped to the owner, and a workspace that exists but belongs to
//! someone else is indistinguishable from one that does not exist.

use crate::auth::resolve_identity;
use crate::handlers::ApiError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use dojo_core::{GatewayError, Persona};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceRequest {
    pub persona: Persona,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePersonaRequest {
    pub persona: Persona,
}

pub async fn create_workspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let identity = resolve_identity(&state.store, &headers)?;
    state.throttle.check(
        &identity.user_id,
        "create_workspace",
        state.config.workspace_cooldown_ms,
    )?;

    let workspace = state.store.create_workspace(&identity.user_id, req.persona)?;
    tracing::info!(
        target: "dojo::workspaces",
        workspace = %workspace.id,
        persona = %req.persona.as_str(),
        "Workspace created"
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "workspace": workspace })),
    ))
}

pub async fn list_workspaces(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let identity = resolve_identity(&state.store, &headers)?;
    let workspaces = state.store.list_workspaces(&identity.user_id)?;
    Ok(Json(json!({ "success": true, "workspaces": workspaces })))
}

pub async fn fetch_workspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = resolve_identity(&state.store, &headers)?;
    let payload = state
        .store
        .fetch_workspace(&workspace_id, &identity.user_id)?
        .ok_or(GatewayError::TenantIsolation)?;
    Ok(Json(json!({ "success": true, "workspace": payload })))
}

pub async fn update_workspace_persona(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<String>,
    Json(req): Json<UpdatePersonaRequest>,
) -> Result<Json<Value>, ApiError> {
    let identity = resolve_identity(&state.store, &headers)?;
    let changed = state
        .store
        .update_persona(&workspace_id, &identity.user_id, req.persona)?;
    if !changed {
        return Err(GatewayError::TenantIsolation.into());
    }
    Ok(Json(json!({ "success": true })))
}

pub async fn delete_workspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = resolve_identity(&state.store, &headers)?;
    state.throttle.check(
        &identity.user_id,
        "delete_workspace",
        state.config.workspace_cooldown_ms,
    )?;

    let deleted = state
        .store
        .delete_workspace(&workspace_id, &identity.user_id)?;
    if !deleted {
        return Err(GatewayError::TenantIsolation.into());
    }
    tracing::info!(target: "dojo::workspaces", workspace = %workspace_id, "Workspace deleted");
    Ok(Json(json!({ "success": true })))
}
