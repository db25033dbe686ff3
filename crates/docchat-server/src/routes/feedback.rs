//! Feedback on the session's latest traced answer.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use super::ApiResult;
use crate::state::AppState;
use docchat_core::Error;
use docchat_trace::{FeedbackEntry, FeedbackMode};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/sessions/{id}/feedback", post(submit_feedback))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    /// Rating token from the session's mode, e.g. "👍" or "😐".
    pub score: String,
    pub comment: Option<String>,
    /// Switches the session's mode before recording.
    pub mode: Option<FeedbackMode>,
}

/// POST /api/sessions/{id}/feedback
async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<FeedbackRequest>,
) -> ApiResult<Json<FeedbackEntry>> {
    let handle = state.session(&id)?;
    let mut session = handle.try_lock().map_err(|_| Error::Busy)?;
    if let Some(mode) = req.mode {
        session.feedback_mode = mode;
    }
    let entry = state
        .orchestrator
        .record_feedback(&session, &req.score, req.comment.as_deref())
        .await?;
    Ok(Json(entry))
}
