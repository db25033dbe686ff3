//! Tracing and feedback types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The most recent traced invocation of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_url: Option<String>,
}

/// One model invocation as reported to the tracing backend.
#[derive(Debug, Clone, Serialize)]
pub struct TracedRun {
    pub id: Uuid,
    pub name: String,
    pub run_type: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub inputs: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tags: Vec<String>,
    /// Project the run is filed under.
    pub session_name: String,
}

impl TracedRun {
    pub fn start(name: impl Into<String>, project: impl Into<String>, inputs: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            run_type: "chain".into(),
            start_time: Utc::now(),
            end_time: None,
            inputs,
            outputs: None,
            error: None,
            tags: vec!["docchat".into()],
            session_name: project.into(),
        }
    }

    pub fn finish(&mut self, output: &str) {
        self.end_time = Some(Utc::now());
        self.outputs = Some(serde_json::json!({ "output": output }));
    }

    pub fn fail(&mut self, error: &str) {
        self.end_time = Some(Utc::now());
        self.error = Some(error.to_string());
    }
}

/// A rating attached to one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackEntry {
    pub id: Uuid,
    pub run_id: Uuid,
    /// `"<mode> <token>"`, e.g. `"faces 😐"`.
    pub key: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}
