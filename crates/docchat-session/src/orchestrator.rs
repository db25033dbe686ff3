//! Orchestrator: runs one chat turn against a session.

use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::session::ChatSession;
use crate::types::{TurnOutcome, TurnSettings, TurnState};
use docchat_chat::{get_llm, get_runnable, PromptInput, SharedModel, TokenSink};
use docchat_core::{AppConfig, AzureSettings, ChunkParams, Error, Provider, Result};
use docchat_ingest::{DocumentContext, EmbedderBackend, IngestCache, NoopEmbedder, OpenAiEmbedder};
use docchat_trace::{score_for, FeedbackEntry, LangSmithClient, RunRecord, TraceBackend, Tracer};

/// Builds the chat model for a turn.
pub trait ModelFactory: Send + Sync {
    fn build(
        &self,
        provider: Provider,
        model: &str,
        api_key: &str,
        temperature: f64,
        max_tokens: usize,
    ) -> Result<SharedModel>;
}

/// Models backed by the provider HTTP APIs.
pub struct HttpModelFactory {
    client: Client,
    azure: AzureSettings,
}

impl HttpModelFactory {
    pub fn new(client: Client, azure: AzureSettings) -> Self {
        Self { client, azure }
    }
}

impl ModelFactory for HttpModelFactory {
    fn build(
        &self,
        provider: Provider,
        model: &str,
        api_key: &str,
        temperature: f64,
        max_tokens: usize,
    ) -> Result<SharedModel> {
        let llm = get_llm(
            self.client.clone(),
            provider,
            model,
            api_key,
            temperature,
            max_tokens,
            &self.azure,
        )?;
        Ok(Arc::new(llm))
    }
}

/// Coordinates models, documents and tracing for any number of sessions.
pub struct Orchestrator {
    config: Arc<AppConfig>,
    client: Client,
    models: Arc<dyn ModelFactory>,
    tracer: Option<Tracer>,
    documents: IngestCache,
}

impl Orchestrator {
    /// Create an orchestrator talking to the real provider and tracing APIs.
    pub fn new(config: Arc<AppConfig>, client: Client) -> Self {
        let models = Arc::new(HttpModelFactory::new(client.clone(), config.azure.clone()));
        let tracer = LangSmithClient::from_settings(client.clone(), &config.tracing).map(|c| {
            let backend: Arc<dyn TraceBackend> = Arc::new(c);
            Tracer::new(backend, config.tracing.project.as_str())
        });

        info!(
            "Orchestrator initialized: tracing={}, project={}",
            tracer.is_some(),
            config.tracing.project
        );

        Self {
            config,
            client,
            models,
            tracer,
            documents: IngestCache::new(),
        }
    }

    pub fn with_models(mut self, models: Arc<dyn ModelFactory>) -> Self {
        self.models = models;
        self
    }

    pub fn with_tracer(mut self, tracer: Option<Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Tracer for a session: its own key if one was entered, else the global one.
    pub fn tracer_for(&self, session: &ChatSession) -> Option<Tracer> {
        match session.tracing_api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => {
                let client = LangSmithClient::new(
                    self.client.clone(),
                    key,
                    self.config.tracing.endpoint.as_str(),
                );
                Some(Tracer::new(Arc::new(client), self.config.tracing.project.as_str()))
            }
            _ => self.tracer.clone(),
        }
    }

    pub fn tracing_enabled(&self, session: &ChatSession) -> bool {
        self.tracer_for(session).is_some()
    }

    /// Build the model a turn would use. Fails with `Config` for an unknown
    /// model and `Credential` when no key is available for its provider.
    pub fn resolve_model(&self, settings: &TurnSettings) -> Result<SharedModel> {
        let provider = Provider::for_model(&settings.model)
            .ok_or_else(|| Error::Config(format!("Unsupported model: {}", settings.model)))?;

        let api_key = settings
            .provider_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .or_else(|| self.config.provider_keys.get(provider))
            .unwrap_or_default();

        self.models.build(
            provider,
            &settings.model,
            api_key,
            settings.temperature,
            settings.max_tokens,
        )
    }

    /// Answer `message`, streaming the reply into `sink`.
    ///
    /// On any error the history is left as it was. On success the user
    /// message and reply are appended and, when tracing is enabled, the
    /// session's run record is replaced.
    pub async fn submit(
        &self,
        session: &mut ChatSession,
        settings: &TurnSettings,
        message: &str,
        sink: &mut dyn TokenSink,
    ) -> Result<TurnOutcome> {
        if session.state != TurnState::Idle {
            return Err(Error::Busy);
        }
        let llm = self.resolve_model(settings)?;
        self.submit_with(session, settings, llm, message, sink).await
    }

    /// Same as [`Orchestrator::submit`] with a model already obtained from
    /// [`Orchestrator::resolve_model`].
    pub async fn submit_with(
        &self,
        session: &mut ChatSession,
        settings: &TurnSettings,
        llm: SharedModel,
        message: &str,
        sink: &mut dyn TokenSink,
    ) -> Result<TurnOutcome> {
        if session.state != TurnState::Idle {
            return Err(Error::Busy);
        }
        let tracer = self.tracer_for(session);

        session.state = TurnState::AwaitingResponse;
        let started = Instant::now();

        let runnable = get_runnable(
            settings.document_chat,
            settings.chain_type,
            llm,
            session.document().cloned(),
        );
        let mut run = tracer.as_ref().map(|t| {
            t.start_run(
                &runnable.name(),
                serde_json::json!({
                    "input": message,
                    "chat_history": session.history(),
                    "model": settings.model,
                }),
            )
        });

        debug!("Session {} invoking {}", session.id, runnable.name());
        let result = {
            let input = PromptInput::new(&settings.system_prompt, session.history(), message);
            runnable.invoke(&input, sink).await
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                session.state = TurnState::Idle;
                warn!("Session {} turn failed: {}", session.id, e);
                if let (Some(tracer), Some(run)) = (tracer.as_ref(), run.as_mut()) {
                    run.fail(&e.to_string());
                    if let Err(report) = tracer.submit(run).await {
                        warn!("Failed to report run {}: {}", run.id, report);
                    }
                }
                return Err(e);
            }
        };

        session.push_turn(message, reply.clone());

        let record = match (tracer.as_ref(), run.as_mut()) {
            (Some(tracer), Some(run)) => {
                run.finish(&reply);
                let trace_url = match tracer.submit(run).await {
                    Ok(()) => tracer.resolve_url(run.id).await,
                    Err(e) => {
                        warn!("Failed to report run {}: {}", run.id, e);
                        None
                    }
                };
                let record = RunRecord {
                    run_id: run.id,
                    trace_url,
                };
                session.run_record = Some(record.clone());
                Some(record)
            }
            _ => None,
        };

        session.state = TurnState::Idle;
        let duration = started.elapsed();
        info!(
            "Session {} answered in {}ms ({} chars)",
            session.id,
            duration.as_millis(),
            reply.len()
        );

        Ok(TurnOutcome {
            reply,
            run: record,
            duration,
        })
    }

    /// Attach a rating to the session's current run.
    pub async fn record_feedback(
        &self,
        session: &ChatSession,
        token: &str,
        comment: Option<&str>,
    ) -> Result<FeedbackEntry> {
        score_for(session.feedback_mode, token)?;
        let tracer = self.tracer_for(session).ok_or(Error::TracingDisabled)?;
        tracer
            .feedback()
            .record(session.run_record(), session.feedback_mode, token, comment)
            .await
    }

    /// Build (or reuse) the document context for an upload and attach it.
    ///
    /// Embeddings use the OpenAI key, when one is known; otherwise ranking
    /// falls back to keyword scoring.
    pub async fn load_document(
        &self,
        session: &mut ChatSession,
        bytes: &[u8],
        filename: Option<&str>,
        params: ChunkParams,
        openai_api_key: Option<&str>,
    ) -> Result<Arc<DocumentContext>> {
        let key = openai_api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .or_else(|| self.config.provider_keys.get(Provider::OpenAI));
        let embedder: Arc<dyn EmbedderBackend> = match key {
            Some(key) => Arc::new(OpenAiEmbedder::new(self.client.clone(), key)),
            None => Arc::new(NoopEmbedder),
        };

        let context = self
            .documents
            .get_or_build(bytes, filename, params, embedder)
            .await?;
        session.set_document(context.clone());
        info!(
            "Session {} loaded {} ({} chunks)",
            session.id,
            filename.unwrap_or("document"),
            context.chunks.len()
        );
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docchat_chat::providers::{BoxedStream, StreamChunk};
    use docchat_chat::{ChainType, ChatMessage, ChatModel, NullSink, StreamHandler};
    use docchat_core::config::GREETING;
    use docchat_trace::{FeedbackMode, TracedRun};
    use parking_lot::Mutex;
    use uuid::Uuid;

    /// Replies with a fixed text, or fails with the given error.
    struct CannedModel {
        reply: std::result::Result<String, String>,
    }

    impl ChatModel for CannedModel {
        fn stream(&self, _messages: Vec<ChatMessage>) -> BoxedStream {
            let chunks = match &self.reply {
                Ok(text) => vec![
                    StreamChunk::Token(text.clone()),
                    StreamChunk::Done { tokens_used: 1 },
                ],
                Err(e) => vec![StreamChunk::Error(Error::Provider(e.clone()))],
            };
            Box::pin(tokio_stream::iter(chunks))
        }

        fn provider(&self) -> Provider {
            Provider::OpenAI
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    struct CannedFactory(std::result::Result<String, String>);

    impl ModelFactory for CannedFactory {
        fn build(&self, _: Provider, _: &str, _: &str, _: f64, _: usize) -> Result<SharedModel> {
            Ok(Arc::new(CannedModel {
                reply: self.0.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct MemoryBackend {
        runs: Mutex<Vec<TracedRun>>,
        feedback: Mutex<Vec<FeedbackEntry>>,
        lookup_fails: bool,
    }

    #[async_trait]
    impl TraceBackend for MemoryBackend {
        async fn create_run(&self, run: &TracedRun) -> Result<()> {
            self.runs.lock().push(run.clone());
            Ok(())
        }
        async fn read_run_url(&self, run_id: Uuid) -> Result<String> {
            if self.lookup_fails {
                return Err(Error::TraceLookup("unavailable".into()));
            }
            Ok(format!("https://smith.example/r/{}", run_id))
        }
        async fn create_feedback(&self, feedback: &FeedbackEntry) -> Result<()> {
            self.feedback.lock().push(feedback.clone());
            Ok(())
        }
    }

    fn config_with_openai_key() -> Arc<AppConfig> {
        let mut config = AppConfig::default();
        config.provider_keys.openai = Some("sk-test".into());
        Arc::new(config)
    }

    fn orchestrator(reply: std::result::Result<&str, &str>, backend: Option<Arc<MemoryBackend>>) -> Orchestrator {
        let reply = reply.map(str::to_string).map_err(str::to_string);
        Orchestrator::new(config_with_openai_key(), Client::new())
            .with_models(Arc::new(CannedFactory(reply)))
            .with_tracer(backend.map(|b| Tracer::new(b, "docchat")))
    }

    #[tokio::test]
    async fn test_successful_turn_appends_user_then_assistant() {
        let orch = orchestrator(Ok("Ownership moves values."), None);
        let mut session = ChatSession::new("s");
        let mut frames = Vec::new();
        let mut sink = StreamHandler::new(|t: &str| frames.push(t.to_string()));

        let outcome = orch
            .submit(&mut session, &TurnSettings::default(), "What is ownership?", &mut sink)
            .await
            .unwrap();
        assert!(sink.is_done());
        drop(sink);

        assert_eq!(outcome.reply, "Ownership moves values.");
        assert!(outcome.run.is_none());
        let history = session.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1], ChatMessage::user("What is ownership?"));
        assert_eq!(history[2], ChatMessage::assistant("Ownership moves values."));
        assert_eq!(frames, vec!["Ownership moves values."]);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_empty_openai_key_is_credential_error() {
        let orch = Orchestrator::new(Arc::new(AppConfig::default()), Client::new());
        let mut session = ChatSession::new("s");
        let settings = TurnSettings {
            provider_api_key: Some("  ".into()),
            ..TurnSettings::default()
        };

        let result = orch.submit(&mut session, &settings, "hi", &mut NullSink).await;
        assert!(matches!(result, Err(Error::Credential(p)) if p == "OpenAI"));
        assert_eq!(session.history(), &[ChatMessage::assistant(GREETING)]);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_history() {
        let orch = orchestrator(Err("overloaded"), None);
        let mut session = ChatSession::new("s");

        let result = orch
            .submit(&mut session, &TurnSettings::default(), "hi", &mut NullSink)
            .await;
        assert!(matches!(result, Err(Error::Provider(_))));
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_model_is_config_error() {
        let orch = orchestrator(Ok("x"), None);
        let mut session = ChatSession::new("s");
        let settings = TurnSettings {
            model: "gpt-99".into(),
            ..TurnSettings::default()
        };
        let result = orch.submit(&mut session, &settings, "hi", &mut NullSink).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_busy_session_rejects_submission() {
        let orch = orchestrator(Ok("x"), None);
        let mut session = ChatSession::new("s");
        session.state = TurnState::AwaitingResponse;

        let result = orch
            .submit(&mut session, &TurnSettings::default(), "hi", &mut NullSink)
            .await;
        assert!(matches!(result, Err(Error::Busy)));
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn test_traced_turns_replace_run_record() {
        let backend = Arc::new(MemoryBackend::default());
        let orch = orchestrator(Ok("answer"), Some(backend.clone()));
        let mut session = ChatSession::new("s");
        let settings = TurnSettings::default();

        let first = orch.submit(&mut session, &settings, "one", &mut NullSink).await.unwrap();
        let first = first.run.unwrap();
        assert_eq!(session.run_record(), Some(&first));
        assert!(first.trace_url.as_deref().unwrap().ends_with(&first.run_id.to_string()));

        let second = orch.submit(&mut session, &settings, "two", &mut NullSink).await.unwrap();
        let second = second.run.unwrap();
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(session.run_record(), Some(&second));

        let runs = backend.runs.lock();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].name, "chat");
        assert_eq!(runs[1].tags, vec!["docchat".to_string()]);
        assert_eq!(runs[1].inputs["input"], "two");
    }

    #[tokio::test]
    async fn test_failed_turn_is_traced_but_keeps_run_record() {
        let backend = Arc::new(MemoryBackend::default());
        let mut session = ChatSession::new("s");
        let settings = TurnSettings::default();

        let good = orchestrator(Ok("answer"), Some(backend.clone()));
        let first = good
            .submit(&mut session, &settings, "one", &mut NullSink)
            .await
            .unwrap()
            .run
            .unwrap();

        let failing = orchestrator(Err("overloaded"), Some(backend.clone()));
        let llm = failing.resolve_model(&settings).unwrap();
        let result = failing
            .submit_with(&mut session, &settings, llm, "two", &mut NullSink)
            .await;
        assert!(matches!(result, Err(Error::Provider(_))));

        assert_eq!(session.run_record(), Some(&first));
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.state(), TurnState::Idle);

        let runs = backend.runs.lock();
        assert_eq!(runs.len(), 2);
        assert!(runs[0].error.is_none());
        assert_eq!(runs[1].inputs["input"], "two");
        assert!(runs[1].error.as_deref().unwrap().contains("overloaded"));
        assert!(runs[1].end_time.is_some());
        assert!(runs[1].outputs.is_none());
    }

    #[tokio::test]
    async fn test_trace_lookup_failure_omits_link() {
        let backend = Arc::new(MemoryBackend {
            lookup_fails: true,
            ..MemoryBackend::default()
        });
        let orch = orchestrator(Ok("answer"), Some(backend));
        let mut session = ChatSession::new("s");

        let outcome = orch
            .submit(&mut session, &TurnSettings::default(), "hi", &mut NullSink)
            .await
            .unwrap();
        let run = outcome.run.unwrap();
        assert!(run.trace_url.is_none());
        assert_eq!(session.run_record().map(|r| r.run_id), Some(run.run_id));
        assert_eq!(session.history().len(), 3);
    }

    #[tokio::test]
    async fn test_clear_after_traced_turn() {
        let backend = Arc::new(MemoryBackend::default());
        let orch = orchestrator(Ok("answer"), Some(backend));
        let mut session = ChatSession::new("s");
        orch.submit(&mut session, &TurnSettings::default(), "hi", &mut NullSink)
            .await
            .unwrap();

        session.clear();
        assert_eq!(session.history(), &[ChatMessage::assistant(GREETING)]);
        assert!(session.run_record().is_none());
        assert!(session.trace_url().is_none());
    }

    #[tokio::test]
    async fn test_feedback_flow() {
        let backend = Arc::new(MemoryBackend::default());
        let orch = orchestrator(Ok("answer"), Some(backend.clone()));
        let mut session = ChatSession::new("s");
        session.feedback_mode = FeedbackMode::Faces;

        let result = orch.record_feedback(&session, "😐", None).await;
        assert!(matches!(result, Err(Error::NoActiveRun)));

        orch.submit(&mut session, &TurnSettings::default(), "hi", &mut NullSink)
            .await
            .unwrap();

        let bad = orch.record_feedback(&session, "👍", None).await;
        assert!(matches!(bad, Err(Error::FeedbackValidation(_))));
        assert!(backend.feedback.lock().is_empty());

        let entry = orch.record_feedback(&session, "😐", Some("ok")).await.unwrap();
        assert_eq!(entry.score, 0.5);
        assert_eq!(entry.run_id, session.run_record().unwrap().run_id);
        assert_eq!(backend.feedback.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_feedback_without_tracing() {
        let orch = orchestrator(Ok("answer"), None);
        let session = ChatSession::new("s");

        let result = orch.record_feedback(&session, "👍", None).await;
        assert!(matches!(result, Err(Error::TracingDisabled)));
        let result = orch.record_feedback(&session, "meh", None).await;
        assert!(matches!(result, Err(Error::FeedbackValidation(_))));
    }

    #[tokio::test]
    async fn test_document_chat_uses_loaded_document() {
        let orch = Orchestrator::new(Arc::new(AppConfig::default()), Client::new())
            .with_models(Arc::new(CannedFactory(Ok("From the notes.".into()))));
        let mut session = ChatSession::new("s");

        let context = orch
            .load_document(
                &mut session,
                b"Borrowing lets code use a value without taking ownership.",
                Some("notes.txt"),
                ChunkParams::default(),
                None,
            )
            .await
            .unwrap();
        assert!(!context.retriever.is_vector());
        assert!(session.document().is_some());

        let settings = TurnSettings {
            provider_api_key: Some("sk-test".into()),
            document_chat: true,
            chain_type: ChainType::Stuff,
            ..TurnSettings::default()
        };
        let outcome = orch
            .submit(&mut session, &settings, "What is borrowing?", &mut NullSink)
            .await
            .unwrap();
        assert_eq!(outcome.reply, "From the notes.");
    }
}
