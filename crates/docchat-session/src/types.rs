//! Session-level types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use docchat_chat::ChainType;
use docchat_core::AppConfig;
use docchat_trace::RunRecord;

/// Whether a session is waiting on a model reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnState {
    #[default]
    Idle,
    AwaitingResponse,
}

/// User-selected settings for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TurnSettings {
    pub model: String,
    /// Overrides the key from the environment for this turn.
    #[serde(skip_serializing)]
    pub provider_api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: usize,
    pub document_chat: bool,
    pub chain_type: ChainType,
    pub system_prompt: String,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl TurnSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            provider_api_key: None,
            temperature: config.default_temperature,
            max_tokens: config.default_max_tokens,
            document_chat: false,
            chain_type: ChainType::default(),
            system_prompt: config.default_system_prompt.clone(),
        }
    }
}

/// Result of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    /// Set when the turn was traced.
    pub run: Option<RunRecord>,
    pub duration: Duration,
}
