//! Session lifecycle, transcript and trace link routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use super::ApiResult;
use crate::state::AppState;
use docchat_core::Error;
use docchat_session::SessionSnapshot;
use docchat_trace::{FeedbackMode, RunRecord};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", patch(update_session).delete(delete_session))
        .route("/sessions/{id}/messages", get(get_messages).delete(clear_messages))
        .route("/sessions/{id}/trace", get(get_trace))
}

/// POST /api/sessions
async fn create_session(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SessionSnapshot>) {
    let (id, handle) = state.create_session();
    let snapshot = handle.lock().await.snapshot();
    info!("Created session {} ({} active)", id, state.session_count());
    (StatusCode::CREATED, Json(snapshot))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub feedback_mode: Option<FeedbackMode>,
    /// Empty string clears the per-session key.
    pub tracing_api_key: Option<String>,
}

/// PATCH /api/sessions/{id}
async fn update_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<SessionUpdate>,
) -> ApiResult<Json<SessionSnapshot>> {
    let handle = state.session(&id)?;
    let mut session = handle.try_lock().map_err(|_| Error::Busy)?;
    if let Some(mode) = update.feedback_mode {
        session.feedback_mode = mode;
    }
    if let Some(key) = update.tracing_api_key {
        session.tracing_api_key = Some(key).filter(|k| !k.trim().is_empty());
    }
    Ok(Json(session.snapshot()))
}

/// DELETE /api/sessions/{id}
async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.remove_session(&id)?;
    info!("Deleted session {} ({} active)", id, state.session_count());
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/sessions/{id}/messages
async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionSnapshot>> {
    let handle = state.session(&id)?;
    let session = handle.try_lock().map_err(|_| Error::Busy)?;
    Ok(Json(session.snapshot()))
}

/// DELETE /api/sessions/{id}/messages — back to the greeting.
async fn clear_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionSnapshot>> {
    let handle = state.session(&id)?;
    let mut session = handle.try_lock().map_err(|_| Error::Busy)?;
    session.clear();
    info!("Cleared session {}", id);
    Ok(Json(session.snapshot()))
}

/// GET /api/sessions/{id}/trace
async fn get_trace(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunRecord>> {
    let handle = state.session(&id)?;
    let session = handle.try_lock().map_err(|_| Error::Busy)?;
    session
        .run_record()
        .cloned()
        .map(Json)
        .ok_or_else(|| Error::NotFound("no traced run for this session".into()).into())
}
