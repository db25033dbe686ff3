//! Configuration defaults and environment loading.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Canned assistant message that opens every fresh transcript.
pub const GREETING: &str = "Hello! I'm a helpful AI chatbot. Ask me a question!";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful chatbot.";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const AZURE_MODEL: &str = "Azure OpenAI";

/// Model id → provider. Order is the order models are offered in.
pub const MODEL_DICT: &[(&str, Provider)] = &[
    ("gpt-4o-mini", Provider::OpenAI),
    ("gpt-4o", Provider::OpenAI),
    ("gpt-4-turbo", Provider::OpenAI),
    ("gpt-3.5-turbo", Provider::OpenAI),
    ("claude-3-5-sonnet-20241022", Provider::Anthropic),
    ("claude-3-5-haiku-20241022", Provider::Anthropic),
    ("claude-3-opus-20240229", Provider::Anthropic),
    (AZURE_MODEL, Provider::AzureOpenAI),
];

pub const MIN_TEMP: f64 = 0.0;
pub const MAX_TEMP: f64 = 1.0;
pub const DEFAULT_TEMP: f64 = 0.7;

pub const MIN_MAX_TOKENS: usize = 1;
pub const MAX_MAX_TOKENS: usize = 100_000;
pub const DEFAULT_MAX_TOKENS: usize = 1000;

pub const MIN_CHUNK_SIZE: usize = 1;
pub const MAX_CHUNK_SIZE: usize = 10_000;
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

pub const MIN_CHUNK_OVERLAP: usize = 0;
pub const MAX_CHUNK_OVERLAP: usize = 10_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 0;

pub const MIN_RETRIEVER_K: usize = 1;
pub const MAX_RETRIEVER_K: usize = 10;
pub const DEFAULT_RETRIEVER_K: usize = 4;

pub const DEFAULT_TRACING_PROJECT: &str = "docchat";
pub const DEFAULT_TRACING_ENDPOINT: &str = "https://api.smith.langchain.com";

pub const DEFAULT_PORT: u16 = 8501;

/// Idle sessions are dropped after this long. Zero keeps them forever.
pub const DEFAULT_SESSION_IDLE_MINUTES: u64 = 60;

/// LLM provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "OpenAI")]
    OpenAI,
    #[serde(rename = "Azure OpenAI")]
    AzureOpenAI,
    #[serde(rename = "Anthropic")]
    Anthropic,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::OpenAI => write!(f, "OpenAI"),
            Provider::AzureOpenAI => write!(f, "Azure OpenAI"),
            Provider::Anthropic => write!(f, "Anthropic"),
        }
    }
}

impl Provider {
    /// Look up the provider serving a model id.
    pub fn for_model(model: &str) -> Option<Self> {
        MODEL_DICT
            .iter()
            .find(|(name, _)| *name == model)
            .map(|(_, provider)| *provider)
    }

    /// Upper bound on in-flight requests for multi-call chains.
    pub fn max_concurrency(&self) -> usize {
        match self {
            Provider::Anthropic => 5,
            Provider::OpenAI | Provider::AzureOpenAI => 8,
        }
    }
}

/// All model ids offered to the user.
pub fn supported_models() -> Vec<&'static str> {
    MODEL_DICT.iter().map(|(name, _)| *name).collect()
}

/// API keys for providers that authenticate with a single key.
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
}

impl ProviderKeys {
    pub fn get(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAI => self.openai.as_deref(),
            Provider::Anthropic => self.anthropic.as_deref(),
            Provider::AzureOpenAI => None,
        }
    }
}

/// Azure OpenAI deployment settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureSettings {
    pub base_url: String,
    pub api_version: String,
    pub deployment_name: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model_version: String,
}

impl AzureSettings {
    /// True when every field needed to reach a deployment is set.
    pub fn is_available(&self) -> bool {
        [
            &self.base_url,
            &self.api_version,
            &self.deployment_name,
            &self.api_key,
            &self.model_version,
        ]
        .iter()
        .all(|v| !v.trim().is_empty())
    }
}

/// Run-tracing backend settings. Tracing is off without an API key.
#[derive(Debug, Clone)]
pub struct TracingSettings {
    pub api_key: Option<String>,
    pub project: String,
    pub endpoint: String,
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            project: DEFAULT_TRACING_PROJECT.into(),
            endpoint: DEFAULT_TRACING_ENDPOINT.into(),
        }
    }
}

impl TracingSettings {
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Document chunking and retrieval parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkParams {
    /// Maximum chunk length in characters (Unicode scalar values).
    pub chunk_size: usize,
    /// Characters of trailing context repeated at the start of the next chunk.
    pub chunk_overlap: usize,
    /// Chunks returned per retrieval.
    pub k: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            k: DEFAULT_RETRIEVER_K,
        }
    }
}

impl ChunkParams {
    /// Clamp every field into its allowed range. Overlap stays below chunk size.
    pub fn clamped(self) -> Self {
        let chunk_size = self.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        let chunk_overlap = self
            .chunk_overlap
            .clamp(MIN_CHUNK_OVERLAP, MAX_CHUNK_OVERLAP)
            .min(chunk_size - 1);
        Self {
            chunk_size,
            chunk_overlap,
            k: self.k.clamp(MIN_RETRIEVER_K, MAX_RETRIEVER_K),
        }
    }
}

pub fn clamp_temperature(t: f64) -> f64 {
    if t.is_nan() {
        return DEFAULT_TEMP;
    }
    t.clamp(MIN_TEMP, MAX_TEMP)
}

pub fn clamp_max_tokens(n: usize) -> usize {
    n.clamp(MIN_MAX_TOKENS, MAX_MAX_TOKENS)
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP server port.
    pub port: u16,
    pub default_model: String,
    pub default_system_prompt: String,
    pub default_temperature: f64,
    pub default_max_tokens: usize,
    pub chunk_defaults: ChunkParams,
    pub provider_keys: ProviderKeys,
    pub azure: AzureSettings,
    pub tracing: TracingSettings,
    pub session_idle_minutes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            default_model: DEFAULT_MODEL.into(),
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            default_temperature: DEFAULT_TEMP,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            chunk_defaults: ChunkParams::default(),
            provider_keys: ProviderKeys::default(),
            azure: AzureSettings::default(),
            tracing: TracingSettings::default(),
            session_idle_minutes: DEFAULT_SESSION_IDLE_MINUTES,
        }
    }
}

impl AppConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let parsed = |name: &str| parse_or_warn::<f64>(name, var(name));
        let parsed_usize = |name: &str| parse_or_warn::<usize>(name, var(name));

        let default_model = var("DEFAULT_MODEL")
            .filter(|m| {
                let known = Provider::for_model(m).is_some();
                if !known {
                    warn!("Ignoring DEFAULT_MODEL={:?}: not a supported model", m);
                }
                known
            })
            .unwrap_or_else(|| DEFAULT_MODEL.into());

        let chunk_defaults = ChunkParams {
            chunk_size: parsed_usize("DEFAULT_CHUNK_SIZE").unwrap_or(DEFAULT_CHUNK_SIZE),
            chunk_overlap: parsed_usize("DEFAULT_CHUNK_OVERLAP").unwrap_or(DEFAULT_CHUNK_OVERLAP),
            k: parsed_usize("DEFAULT_RETRIEVER_K").unwrap_or(DEFAULT_RETRIEVER_K),
        }
        .clamped();

        Self {
            port: parse_or_warn("PORT", var("PORT")).unwrap_or(DEFAULT_PORT),
            default_model,
            default_system_prompt: var("DEFAULT_SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            default_temperature: clamp_temperature(
                parsed("DEFAULT_TEMPERATURE").unwrap_or(DEFAULT_TEMP),
            ),
            default_max_tokens: clamp_max_tokens(
                parsed_usize("DEFAULT_MAX_TOKENS").unwrap_or(DEFAULT_MAX_TOKENS),
            ),
            chunk_defaults,
            provider_keys: ProviderKeys {
                openai: var("OPENAI_API_KEY"),
                anthropic: var("ANTHROPIC_API_KEY"),
            },
            azure: AzureSettings {
                base_url: var("AZURE_OPENAI_BASE_URL").unwrap_or_default(),
                api_version: var("AZURE_OPENAI_API_VERSION").unwrap_or_default(),
                deployment_name: var("AZURE_OPENAI_DEPLOYMENT_NAME").unwrap_or_default(),
                api_key: var("AZURE_OPENAI_API_KEY").unwrap_or_default(),
                model_version: var("AZURE_OPENAI_MODEL_VERSION").unwrap_or_default(),
            },
            tracing: TracingSettings {
                api_key: var("LANGCHAIN_API_KEY"),
                project: var("LANGCHAIN_PROJECT")
                    .unwrap_or_else(|| DEFAULT_TRACING_PROJECT.into()),
                endpoint: var("LANGCHAIN_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_TRACING_ENDPOINT.into()),
            },
            session_idle_minutes: parse_or_warn("SESSION_IDLE_MINUTES", var("SESSION_IDLE_MINUTES"))
                .unwrap_or(DEFAULT_SESSION_IDLE_MINUTES),
        }
    }
}

/// Parse a variable, warning and falling back to the default when it is malformed.
fn parse_or_warn<T: FromStr>(name: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value, using the default", name, raw);
            None
        }
    }
}
