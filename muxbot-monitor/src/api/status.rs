//! Session status endpoints
//!
//! Read-only view of the monitored session: the page-title string, peaks
//! and enrichment state, plus the session's row as stored remotely.

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};
use crate::session::SessionSnapshot;
use crate::AppState;

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<SessionSnapshot>> {
    state
        .status
        .read()
        .await
        .clone()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("monitor has not started".to_string()))
}

#[derive(Debug, Serialize)]
pub struct RemoteRowResponse {
    pub session_key: String,
    pub row: Map<String, Value>,
}

/// GET /status/row
///
/// The session's spreadsheet row, fetched through the relay on demand.
pub async fn get_remote_row(State(state): State<AppState>) -> ApiResult<Json<RemoteRowResponse>> {
    let session_key = match state.status.read().await.as_ref() {
        Some(snapshot) => snapshot.session_key.clone(),
        None => return Err(ApiError::NotFound("monitor has not started".to_string())),
    };

    let row = state
        .sheet
        .fetch_row(&session_key)
        .await
        .ok_or_else(|| ApiError::Upstream(format!("no row available for {}", session_key)))?;

    Ok(Json(RemoteRowResponse { session_key, row }))
}
