//! HTTP route handlers.

pub mod chat;
pub mod config;
pub mod documents;
pub mod feedback;
pub mod sessions;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::state::AppState;
use docchat_core::Error;

/// Build the main Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(config::routes())
        .merge(sessions::routes())
        .merge(chat::routes())
        .merge(documents::routes())
        .merge(feedback::routes())
}

/// Error response: `{"error": "..."}` with a status derived from the error kind.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Credential(_) => StatusCode::UNAUTHORIZED,
        Error::Config(_) | Error::Ingest(_) | Error::TracingDisabled => StatusCode::BAD_REQUEST,
        Error::FeedbackValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Busy | Error::NoActiveRun => StatusCode::CONFLICT,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Provider(_) | Error::Http(_) | Error::TraceLookup(_) => StatusCode::BAD_GATEWAY,
        Error::Io(_) | Error::Json(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
