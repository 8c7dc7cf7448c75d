//! Device registration routes.

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use herald_common::error::AppError;
use herald_common::types::{DeviceDef, DeviceId, UserId};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users/{user}/devices", get(list_devices))
        .route("/api/users/{user}/devices", post(register_device))
        .route("/api/users/{user}/devices/{device}", delete(delete_device))
}

/// Body of a device registration.
#[derive(Debug, Deserialize)]
pub struct RegisterDeviceParams {
    pub device_id: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub lang: String,
}

/// GET /api/users/:user/devices: List a user's registered devices.
async fn list_devices(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<Vec<DeviceDef>>, AppError> {
    let user = UserId(user);
    let (mut devices, _) = state.registry.get_all(std::slice::from_ref(&user)).await?;
    Ok(Json(devices.remove(&user).unwrap_or_default()))
}

/// POST /api/users/:user/devices: Register or refresh a device.
async fn register_device(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(params): Json<RegisterDeviceParams>,
) -> Result<Json<DeviceDef>, AppError> {
    let device_id = params.device_id.trim();
    if device_id.is_empty() {
        return Err(AppError::Validation("device_id must not be empty".to_string()));
    }

    let device = DeviceDef {
        device_id: DeviceId::from(device_id),
        platform: params.platform,
        last_seen: Utc::now(),
        lang: params.lang,
    };
    state.registry.upsert(&UserId(user), device.clone()).await?;
    Ok(Json(device))
}

/// DELETE /api/users/:user/devices/:device: Remove a device. Idempotent.
async fn delete_device(
    State(state): State<AppState>,
    Path((user, device)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .registry
        .delete(&UserId(user), &DeviceId(device))
        .await?;
    Ok(Json(serde_json::json!({"deleted": true})))
}
