//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    engine::GraphSnapshot,
    infrastructure::dto::{
        conversion::room_detail,
        http::{RoomDetailDto, RoomSummaryDto},
    },
    ui::state::AppState,
};

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Get list of rooms
pub async fn get_rooms(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RoomSummaryDto>>, StatusCode> {
    let snapshot = snapshot(&state).await?;

    // スナップショットから DTO への変換
    let rooms = snapshot.rooms.iter().map(RoomSummaryDto::from).collect();
    Ok(Json(rooms))
}

/// Get room detail by ID
pub async fn get_room_detail(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomDetailDto>, StatusCode> {
    let snapshot = snapshot(&state).await?;
    room_detail(&snapshot, &room_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn snapshot(state: &AppState) -> Result<GraphSnapshot, StatusCode> {
    state.manager.snapshot().await.ok_or_else(|| {
        tracing::error!("Manager is not running, cannot read room state");
        StatusCode::SERVICE_UNAVAILABLE
    })
}
