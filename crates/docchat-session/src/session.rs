//! Per-user conversation state.

use std::sync::Arc;

use serde::Serialize;

use crate::types::TurnState;
use docchat_chat::ChatMessage;
use docchat_core::config::GREETING;
use docchat_ingest::DocumentContext;
use docchat_trace::{FeedbackMode, RunRecord};

/// One conversation: history, current traced run, loaded document.
#[derive(Debug)]
pub struct ChatSession {
    pub id: String,
    history: Vec<ChatMessage>,
    pub(crate) run_record: Option<RunRecord>,
    document: Option<Arc<DocumentContext>>,
    pub(crate) state: TurnState,
    pub feedback_mode: FeedbackMode,
    /// Tracing key entered for this session; falls back to the environment.
    pub tracing_api_key: Option<String>,
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    pub feedback_mode: FeedbackMode,
    pub state: TurnState,
}

impl ChatSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: vec![ChatMessage::assistant(GREETING)],
            run_record: None,
            document: None,
            state: TurnState::Idle,
            feedback_mode: FeedbackMode::default(),
            tracing_api_key: None,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub(crate) fn push_turn(&mut self, user: &str, assistant: String) {
        self.history.push(ChatMessage::user(user));
        self.history.push(ChatMessage::assistant(assistant));
    }

    /// Reset to the greeting and forget the current run.
    pub fn clear(&mut self) {
        self.history = vec![ChatMessage::assistant(GREETING)];
        self.run_record = None;
    }

    pub fn run_record(&self) -> Option<&RunRecord> {
        self.run_record.as_ref()
    }

    pub fn trace_url(&self) -> Option<&str> {
        self.run_record.as_ref().and_then(|r| r.trace_url.as_deref())
    }

    pub fn document(&self) -> Option<&Arc<DocumentContext>> {
        self.document.as_ref()
    }

    /// Replace the loaded document.
    pub fn set_document(&mut self, document: Arc<DocumentContext>) {
        self.document = Some(document);
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            messages: self.history.clone(),
            run: self.run_record.clone(),
            document: self.document.as_ref().and_then(|d| d.filename.clone()),
            feedback_mode: self.feedback_mode,
            state: self.state,
        }
    }
}
