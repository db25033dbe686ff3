//! Chat route: one user message in, an SSE stream of tokens out.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::routing::post;
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::ApiResult;
use crate::state::AppState;
use docchat_chat::{ChainType, ChannelSink, StreamEvent};
use docchat_core::{AppConfig, Error};
use docchat_session::TurnSettings;

type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/sessions/{id}/chat", post(chat))
}

/// Chat request. Unset fields fall back to the configured defaults.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub document_chat: bool,
    pub chain_type: Option<ChainType>,
    pub system_prompt: Option<String>,
}

impl ChatRequest {
    pub fn settings(&self, config: &AppConfig) -> TurnSettings {
        let defaults = TurnSettings::from_config(config);
        TurnSettings {
            model: self.model.clone().unwrap_or(defaults.model),
            provider_api_key: self.api_key.clone(),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            document_chat: self.document_chat,
            chain_type: self.chain_type.unwrap_or(defaults.chain_type),
            system_prompt: self.system_prompt.clone().unwrap_or(defaults.system_prompt),
        }
    }
}

pub fn sse_event(event: &StreamEvent) -> Event {
    let name = match event {
        StreamEvent::Token { .. } => "token",
        StreamEvent::Done { .. } => "done",
        StreamEvent::Error { .. } => "error",
    };
    Event::default()
        .event(name)
        .json_data(event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// POST /api/sessions/{id}/chat
///
/// The model and its credential are checked before the stream opens, so a
/// missing key is a 401 and an unknown model a 400. The turn then runs on
/// its own task so a disconnecting client does not cut it short. A session
/// that is already answering rejects the request with 409.
async fn chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Sse<KeepAliveStream<SseStream>>> {
    let handle = state.session(&id)?;
    let mut session = handle.try_lock_owned().map_err(|_| Error::Busy)?;
    let settings = req.settings(&state.config);
    let llm = state.orchestrator.resolve_model(&settings)?;
    let message = req.message;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let task_state = state.clone();
    let turn = tokio::spawn(async move {
        let mut sink = ChannelSink::new(tx);
        task_state
            .orchestrator
            .submit_with(&mut session, &settings, llm, &message, &mut sink)
            .await
    });

    let stream: SseStream = Box::pin(async_stream::stream! {
        while let Some(token) = rx.recv().await {
            yield Ok(sse_event(&StreamEvent::Token { content: token }));
        }

        let last = match turn.await {
            Ok(Ok(outcome)) => {
                debug!("Session {} turn finished", id);
                StreamEvent::Done {
                    message: outcome.reply,
                    run_id: outcome.run.as_ref().map(|r| r.run_id.to_string()),
                    trace_url: outcome.run.and_then(|r| r.trace_url),
                    duration: outcome.duration.as_millis() as u64,
                }
            }
            Ok(Err(e)) => StreamEvent::Error { error: e.to_string() },
            Err(e) => {
                error!("Chat task for session {} panicked: {}", id, e);
                StreamEvent::Error { error: Error::Internal(e.to_string()).to_string() }
            }
        };
        yield Ok(sse_event(&last));
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
