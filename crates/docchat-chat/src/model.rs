//! Chat model factory and the streaming driver.

use std::sync::Arc;

use reqwest::Client;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::providers::{stream_llm, BoxedStream, StreamChunk};
use crate::sink::TokenSink;
use crate::types::{ChatMessage, ProviderConfig};
use docchat_core::config::{clamp_max_tokens, clamp_temperature};
use docchat_core::{AzureSettings, Error, Provider, Result};

/// A configured chat model that streams a reply to a message list.
pub trait ChatModel: Send + Sync {
    fn stream(&self, messages: Vec<ChatMessage>) -> BoxedStream;

    fn provider(&self) -> Provider;

    fn model_name(&self) -> &str;

    /// Upper bound on concurrent calls made by multi-call chains.
    fn max_concurrency(&self) -> usize {
        self.provider().max_concurrency()
    }
}

/// HTTP-backed model for one of the supported providers.
pub struct ProviderModel {
    client: Client,
    config: ProviderConfig,
}

impl ProviderModel {
    pub fn new(client: Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

impl ChatModel for ProviderModel {
    fn stream(&self, messages: Vec<ChatMessage>) -> BoxedStream {
        stream_llm(&self.client, &self.config, messages)
    }

    fn provider(&self) -> Provider {
        self.config.provider
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Build a model for the requested provider and model id.
///
/// Fails with `Credential` when the provider's key is missing and with
/// `Config` when the model is unknown or belongs to another provider.
pub fn get_llm(
    client: Client,
    provider: Provider,
    model: &str,
    provider_api_key: &str,
    temperature: f64,
    max_tokens: usize,
    azure: &AzureSettings,
) -> Result<ProviderModel> {
    match Provider::for_model(model) {
        Some(p) if p == provider => {}
        Some(p) => {
            return Err(Error::Config(format!(
                "Model {} is served by {}, not {}",
                model, p, provider
            )))
        }
        None => return Err(Error::Config(format!("Unsupported model: {}", model))),
    }

    let (api_key, azure) = match provider {
        Provider::OpenAI | Provider::Anthropic => {
            if provider_api_key.trim().is_empty() {
                return Err(Error::Credential(provider.to_string()));
            }
            (provider_api_key.trim().to_string(), None)
        }
        Provider::AzureOpenAI => {
            if azure.api_key.trim().is_empty() {
                return Err(Error::Credential(provider.to_string()));
            }
            if !azure.is_available() {
                return Err(Error::Config("Azure OpenAI settings are incomplete".into()));
            }
            (azure.api_key.clone(), Some(azure.clone()))
        }
    };

    debug!("Configured {} model {}", provider, model);

    Ok(ProviderModel::new(
        client,
        ProviderConfig {
            provider,
            model: model.to_string(),
            api_key,
            temperature: clamp_temperature(temperature),
            max_tokens: clamp_max_tokens(max_tokens),
            azure,
        },
    ))
}

/// Stream one model call into `sink` and return the assembled text.
///
/// `on_done` is signalled only when the model completes.
pub async fn complete(
    model: &dyn ChatModel,
    messages: Vec<ChatMessage>,
    sink: &mut dyn TokenSink,
) -> Result<String> {
    let mut stream = model.stream(messages);
    let mut full_response = String::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            StreamChunk::Token(text) => {
                sink.on_token(&text);
                full_response.push_str(&text);
            }
            StreamChunk::Done { tokens_used } => {
                debug!("{} finished after {} chunks", model.model_name(), tokens_used);
                break;
            }
            StreamChunk::Error(e) => return Err(e),
        }
    }

    sink.on_done();
    Ok(full_response)
}

/// Shared handle to any chat model.
pub type SharedModel = Arc<dyn ChatModel>;


#[cfg(test)]
mod tests {
    use super::testing::ScriptedModel;
    use super::*;
    use crate::sink::StreamHandler;

    #[test]
    fn test_get_llm_requires_key() {
        let result = get_llm(
            Client::new(),
            Provider::OpenAI,
            "gpt-4o-mini",
            "   ",
            0.7,
            100,
            &AzureSettings::default(),
        );
        assert!(matches!(result, Err(Error::Credential(p)) if p == "OpenAI"));
    }

    #[test]
    fn test_get_llm_rejects_provider_mismatch() {
        let result = get_llm(
            Client::new(),
            Provider::Anthropic,
            "gpt-4o",
            "key",
            0.7,
            100,
            &AzureSettings::default(),
        );
        assert!(matches!(result, Err(Error::Config(_))));

        let result = get_llm(
            Client::new(),
            Provider::OpenAI,
            "gpt-99",
            "key",
            0.7,
            100,
            &AzureSettings::default(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_get_llm_azure() {
        let mut azure = AzureSettings::default();
        let result = get_llm(
            Client::new(),
            Provider::AzureOpenAI,
            docchat_core::config::AZURE_MODEL,
            "",
            0.7,
            100,
            &azure,
        );
        assert!(matches!(result, Err(Error::Credential(_))));

        azure.api_key = "key".into();
        let result = get_llm(
            Client::new(),
            Provider::AzureOpenAI,
            docchat_core::config::AZURE_MODEL,
            "",
            0.7,
            100,
            &azure,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_get_llm_clamps_settings() {
        let model = get_llm(
            Client::new(),
            Provider::Anthropic,
            "claude-3-5-haiku-20241022",
            "key",
            7.0,
            0,
            &AzureSettings::default(),
        )
        .unwrap();
        assert_eq!(model.config().temperature, 1.0);
        assert_eq!(model.config().max_tokens, 1);
        assert_eq!(model.max_concurrency(), 5);
    }

    #[tokio::test]
    async fn test_complete_streams_into_sink() {
        let model = ScriptedModel::replying("Rust is fast");
        let mut frames = Vec::new();
        let mut handler = StreamHandler::new(|t: &str| frames.push(t.to_string()));

        let text = complete(&model, vec![ChatMessage::user("hi")], &mut handler)
            .await
            .unwrap();
        assert_eq!(text, "Rust is fast");
        assert!(handler.is_done());
        drop(handler);
        assert_eq!(frames.last().map(String::as_str), Some("Rust is fast"));
        assert_eq!(frames.len(), 3);
    }

    #[tokio::test]
    async fn test_complete_propagates_errors() {
        let model = ScriptedModel::new(|_| Err("auth".into()));
        let mut sink = crate::sink::NullSink;
        let result = complete(&model, vec![ChatMessage::user("hi")], &mut sink).await;
        assert!(matches!(result, Err(Error::Credential(_))));
    }
}
