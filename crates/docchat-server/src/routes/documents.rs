//! Document upload (multipart) for document chat.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::post;
use axum::{Json, Router};
use tracing::warn;

use super::ApiResult;
use crate::state::AppState;
use docchat_core::{ChunkParams, Error};

/// Upload limit for a single document.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/sessions/{id}/document",
        post(upload_document).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
    )
}

fn parse_field(name: &str, value: &str) -> Result<usize, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a non-negative integer", name)))
}

/// POST /api/sessions/{id}/document
///
/// Fields: `file` (required), `chunkSize`, `chunkOverlap`, `k`, `apiKey`.
async fn upload_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let handle = state.session(&id)?;

    let mut params = state.config.chunk_defaults;
    let mut file: Option<(Option<String>, Vec<u8>)> = None;
    let mut api_key: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Ingest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| Error::Ingest(e.to_string()))?;
                file = Some((filename, bytes.to_vec()));
            }
            "chunkSize" | "chunkOverlap" | "k" | "apiKey" => {
                let value = field.text().await.map_err(|e| Error::Ingest(e.to_string()))?;
                match name.as_str() {
                    "chunkSize" => params.chunk_size = parse_field(&name, &value)?,
                    "chunkOverlap" => params.chunk_overlap = parse_field(&name, &value)?,
                    "k" => params.k = parse_field(&name, &value)?,
                    _ => api_key = Some(value),
                }
            }
            other => warn!("Ignoring upload field {:?}", other),
        }
    }

    let (filename, bytes) = file.ok_or_else(|| Error::Ingest("missing file field".into()))?;
    let params: ChunkParams = params.clamped();

    let mut session = handle.try_lock().map_err(|_| Error::Busy)?;
    let context = state
        .orchestrator
        .load_document(&mut session, &bytes, filename.as_deref(), params, api_key.as_deref())
        .await?;

    Ok(Json(serde_json::json!({
        "filename": context.filename,
        "contentHash": context.content_hash,
        "chunks": context.chunks.len(),
        "params": context.params,
        "retrieval": if context.retriever.is_vector() { "vector" } else { "keyword" },
    })))
}
