//! Chat types shared by the factory, chains and front-ends.

use serde::{Deserialize, Serialize};

use docchat_core::{AzureSettings, Error, Provider};

pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

/// Chat message in conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_SYSTEM.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_USER.into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_ASSISTANT.into(),
            content: content.into(),
        }
    }
}

/// Everything needed to call one provider for one turn.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub temperature: f64,
    pub max_tokens: usize,
    /// Only set for Azure OpenAI.
    pub azure: Option<AzureSettings>,
}

/// Strategy for combining retrieved chunks with the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChainType {
    #[default]
    #[serde(rename = "stuff")]
    Stuff,
    #[serde(rename = "refine")]
    Refine,
    #[serde(rename = "map_reduce")]
    MapReduce,
    #[serde(rename = "map_rerank")]
    MapRerank,
    #[serde(rename = "Q&A Generation")]
    QaGeneration,
    #[serde(rename = "Summarization")]
    Summarization,
}

impl ChainType {
    pub const ALL: [ChainType; 6] = [
        ChainType::Stuff,
        ChainType::Refine,
        ChainType::MapReduce,
        ChainType::MapRerank,
        ChainType::QaGeneration,
        ChainType::Summarization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainType::Stuff => "stuff",
            ChainType::Refine => "refine",
            ChainType::MapReduce => "map_reduce",
            ChainType::MapRerank => "map_rerank",
            ChainType::QaGeneration => "Q&A Generation",
            ChainType::Summarization => "Summarization",
        }
    }
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChainType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "stuff" => Ok(ChainType::Stuff),
            "refine" => Ok(ChainType::Refine),
            "map_reduce" | "mapreduce" => Ok(ChainType::MapReduce),
            "map_rerank" | "maprerank" => Ok(ChainType::MapRerank),
            "q&a_generation" | "qa_generation" | "qa" => Ok(ChainType::QaGeneration),
            "summarization" | "summary" => Ok(ChainType::Summarization),
            _ => Err(Error::Config(format!("Unknown chain type: {}", s))),
        }
    }
}

/// SSE stream event types.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "token")]
    Token { content: String },
    #[serde(rename = "done")]
    Done {
        message: String,
        #[serde(rename = "runId", skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(rename = "traceUrl", skip_serializing_if = "Option::is_none")]
        trace_url: Option<String>,
        duration: u64,
    },
    #[serde(rename = "error")]
    Error { error: String },
}
