//! Tracing backend client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::feedback::FeedbackRecorder;
use crate::types::{FeedbackEntry, TracedRun};
use docchat_core::{Error, Result, TracingSettings};

/// Remote store for traced runs and their feedback.
#[async_trait]
pub trait TraceBackend: Send + Sync {
    async fn create_run(&self, run: &TracedRun) -> Result<()>;

    /// Browser URL for a previously created run.
    async fn read_run_url(&self, run_id: Uuid) -> Result<String>;

    async fn create_feedback(&self, feedback: &FeedbackEntry) -> Result<()>;
}

/// LangSmith-compatible REST client.
pub struct LangSmithClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl LangSmithClient {
    pub fn new(client: Client, api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build from settings; `None` when no API key is configured.
    pub fn from_settings(client: Client, settings: &TracingSettings) -> Option<Self> {
        if !settings.is_enabled() {
            return None;
        }
        let key = settings.api_key.as_deref()?.trim();
        Some(Self::new(client, key, settings.endpoint.as_str()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }
}

/// Web host for an API endpoint: `https://api.smith.x` becomes `https://smith.x`
/// and a trailing `/api` path is dropped.
pub fn host_url(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    trimmed.replacen("://api.", "://", 1)
}

async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(Error::Credential("LangSmith".into()))
        }
        StatusCode::NOT_FOUND => Err(Error::TraceLookup(format!("{} not found", what))),
        _ => Err(Error::Http(format!("{} failed ({}): {}", what, status, body))),
    }
}

#[async_trait]
impl TraceBackend for LangSmithClient {
    async fn create_run(&self, run: &TracedRun) -> Result<()> {
        let resp = self
            .client
            .post(self.url("/runs"))
            .header("x-api-key", &self.api_key)
            .json(run)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        check(resp, "create run").await?;
        debug!("Traced run {} ({})", run.id, run.name);
        Ok(())
    }

    async fn read_run_url(&self, run_id: Uuid) -> Result<String> {
        let resp = self
            .client
            .get(self.url(&format!("/runs/{}", run_id)))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::TraceLookup(e.to_string()))?;
        let body: serde_json::Value = check(resp, "run")
            .await?
            .json()
            .await
            .map_err(|e| Error::TraceLookup(e.to_string()))?;

        let app_path = body["app_path"]
            .as_str()
            .ok_or_else(|| Error::TraceLookup(format!("run {} has no app_path", run_id)))?;
        Ok(format!("{}{}", host_url(&self.endpoint), app_path))
    }

    async fn create_feedback(&self, feedback: &FeedbackEntry) -> Result<()> {
        let resp = self
            .client
            .post(self.url("/feedback"))
            .header("x-api-key", &self.api_key)
            .json(feedback)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        check(resp, "create feedback").await?;
        Ok(())
    }
}

/// Backend plus the project runs are filed under.
#[derive(Clone)]
pub struct Tracer {
    backend: Arc<dyn TraceBackend>,
    project: String,
}

impl Tracer {
    pub fn new(backend: Arc<dyn TraceBackend>, project: impl Into<String>) -> Self {
        Self {
            backend,
            project: project.into(),
        }
    }

    pub fn start_run(&self, name: &str, inputs: serde_json::Value) -> TracedRun {
        TracedRun::start(name, self.project.as_str(), inputs)
    }

    /// Report a completed run, waiting until the backend has it.
    pub async fn submit(&self, run: &TracedRun) -> Result<()> {
        self.backend.create_run(run).await
    }

    /// Look up the browser URL for a run. Failures are logged and yield `None`.
    pub async fn resolve_url(&self, run_id: Uuid) -> Option<String> {
        match self.backend.read_run_url(run_id).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Could not resolve trace URL for run {}: {}", run_id, e);
                None
            }
        }
    }

    pub fn feedback(&self) -> FeedbackRecorder {
        FeedbackRecorder::new(self.backend.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingLookup;

    #[async_trait]
    impl TraceBackend for FailingLookup {
        async fn create_run(&self, _run: &TracedRun) -> Result<()> {
            Ok(())
        }
        async fn read_run_url(&self, run_id: Uuid) -> Result<String> {
            Err(Error::TraceLookup(format!("{} not found", run_id)))
        }
        async fn create_feedback(&self, _feedback: &FeedbackEntry) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_host_url() {
        assert_eq!(host_url("https://api.smith.langchain.com"), "https://smith.langchain.com");
        assert_eq!(host_url("https://langsmith.example.com/api/"), "https://langsmith.example.com");
        assert_eq!(host_url("http://localhost:1984"), "http://localhost:1984");
    }

    #[test]
    fn test_from_settings_requires_key() {
        let settings = TracingSettings::default();
        assert!(LangSmithClient::from_settings(Client::new(), &settings).is_none());
    }

    #[tokio::test]
    async fn test_resolve_url_failure_is_none() {
        let tracer = Tracer::new(Arc::new(FailingLookup), "docchat");
        assert_eq!(tracer.resolve_url(Uuid::new_v4()).await, None);
    }

    #[test]
    fn test_start_run_tags() {
        let tracer = Tracer::new(Arc::new(FailingLookup), "proj");
        let mut run = tracer.start_run("chat", serde_json::json!({ "input": "hi" }));
        run.finish("hello");
        assert_eq!(run.session_name, "proj");
        assert_eq!(run.tags, vec!["docchat".to_string()]);
        assert!(run.end_time.is_some());
        assert_eq!(run.outputs.unwrap()["output"], "hello");
    }
}
