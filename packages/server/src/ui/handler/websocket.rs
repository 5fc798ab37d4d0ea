//! WebSocket connection handler.

use std::sync::Arc;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::{
    domain::{ConnectError, DisplayName, UserId},
    ui::{connection, state::AppState},
};

/// Query parameters for WebSocket connection
///
/// `name` defaults to the user id.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub user_id: String,
    pub name: Option<String>,
}

/// Admit an identity and upgrade the request into a managed connection.
///
/// A user id that already holds a live connection is rejected with
/// `409 Conflict` before the upgrade.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    // Convert String -> Domain Models
    let user_id = UserId::try_from(query.user_id.clone()).map_err(|e| {
        tracing::warn!("Invalid user_id '{}': {}", query.user_id, e);
        StatusCode::BAD_REQUEST
    })?;
    let name = query.name.unwrap_or_else(|| query.user_id.clone());
    let name = DisplayName::new(name).map_err(|e| {
        tracing::warn!("Invalid display name for '{}': {}", user_id, e);
        StatusCode::BAD_REQUEST
    })?;

    let session = match state.manager.connect(user_id.clone(), name).await {
        Ok(session) => session,
        Err(ConnectError::DuplicateUser(id)) => {
            tracing::warn!(
                "User '{}' is already connected. Rejecting connection.",
                id
            );
            return Err(StatusCode::CONFLICT);
        }
        Err(ConnectError::EngineUnavailable) => {
            tracing::error!("Manager is not running. Cannot admit '{}'", user_id);
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    };
    tracing::info!("User '{}' connected and registered", user_id);

    let manager = state.manager.clone();
    let config = state.config.clone();
    let session_id = session.id;
    let cleanup = state.manager.clone();

    Ok(ws
        .max_message_size(config.max_message_size)
        .on_failed_upgrade(move |e| {
            tracing::warn!("WebSocket upgrade for '{}' failed: {}", user_id, e);
            tokio::spawn(async move { cleanup.disconnect(user_id, session_id).await });
        })
        .on_upgrade(move |socket| connection::serve(socket, session, manager, config)))
}
