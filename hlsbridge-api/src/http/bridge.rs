//! Relay session control endpoints
//!
//! - `POST /bridge/start`
//! - `GET /bridge/status/{stream_id}`
//! - `DELETE /bridge/stop/{stream_id}`
//!
//! Handlers only validate and forward; every session decision is made by the
//! stream's relay actor.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hlsbridge_relay::{DestinationCredentials, FinalStats, StartRequest, StatusSnapshot};

use crate::http::{AppError, AppResult, AppState};

/// Start request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBody {
    pub stream_id: Option<String>,
    #[serde(rename = "sourceManifestURL")]
    pub source_manifest_url: Option<String>,
    pub destination_stream_key: Option<String>,
    pub destination_credentials: Option<DestinationCredentials>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub destination_upload_id: String,
    pub already_active: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub success: bool,
    pub final_stats: FinalStats,
}

pub fn create_bridge_router() -> Router<AppState> {
    Router::new()
        .route("/bridge/start", post(start_bridge))
        .route("/bridge/status/{stream_id}", get(bridge_status))
        .route("/bridge/stop/{stream_id}", delete(stop_bridge))
        .route("/bridge/status", get(missing_stream_id))
        .route("/bridge/status/", get(missing_stream_id))
        .route("/bridge/stop", delete(missing_stream_id))
        .route("/bridge/stop/", delete(missing_stream_id))
}

/// POST /bridge/start
pub async fn start_bridge(
    State(state): State<AppState>,
    body: Result<Json<StartBody>, JsonRejection>,
) -> AppResult<Json<StartResponse>> {
    let Json(body) = body?;

    let stream_id = required(body.stream_id).ok_or_else(AppError::stream_id_required)?;
    let source_manifest_url = required(body.source_manifest_url)
        .ok_or_else(|| AppError::bad_request("sourceManifestURL required"))?;
    let destination_stream_key = required(body.destination_stream_key)
        .ok_or_else(|| AppError::bad_request("destinationStreamKey required"))?;

    let outcome = state
        .registry
        .start(
            &stream_id,
            StartRequest {
                source_manifest_url,
                destination_stream_key,
                credentials: body.destination_credentials,
            },
        )
        .await?;

    Ok(Json(StartResponse {
        success: true,
        started_at: outcome.started_at,
        destination_upload_id: outcome.destination_upload_id,
        already_active: outcome.already_active,
    }))
}

/// GET /bridge/status/{stream_id}
pub async fn bridge_status(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> AppResult<Json<StatusSnapshot>> {
    let stream_id = required(Some(stream_id)).ok_or_else(AppError::stream_id_required)?;
    Ok(Json(state.registry.status(&stream_id).await?))
}

/// DELETE /bridge/stop/{stream_id}
pub async fn stop_bridge(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> AppResult<Json<StopResponse>> {
    let stream_id = required(Some(stream_id)).ok_or_else(AppError::stream_id_required)?;
    let final_stats = state.registry.stop(&stream_id).await?;
    Ok(Json(StopResponse {
        success: true,
        final_stats,
    }))
}

async fn missing_stream_id() -> AppError {
    AppError::stream_id_required()
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
