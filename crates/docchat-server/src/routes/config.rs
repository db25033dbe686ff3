//! Static configuration for clients: models, bounds, defaults.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;
use docchat_chat::ChainType;
use docchat_core::config::{self, supported_models, GREETING};
use docchat_core::Provider;
use docchat_trace::FeedbackMode;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/config", get(get_config))
}

/// GET /api/config
async fn get_config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let cfg = &state.config;
    let chain_types: Vec<&str> = ChainType::ALL.iter().map(ChainType::as_str).collect();
    let feedback_modes = [FeedbackMode::Thumbs, FeedbackMode::Faces].map(|mode| {
        serde_json::json!({
            "mode": mode,
            "tokens": mode.scores().iter().map(|(t, _)| *t).collect::<Vec<_>>(),
        })
    });

    Json(serde_json::json!({
        "greeting": GREETING,
        "models": supported_models(),
        "defaultModel": cfg.default_model,
        "defaultSystemPrompt": cfg.default_system_prompt,
        "temperature": {
            "min": config::MIN_TEMP,
            "max": config::MAX_TEMP,
            "default": cfg.default_temperature,
        },
        "maxTokens": {
            "min": config::MIN_MAX_TOKENS,
            "max": config::MAX_MAX_TOKENS,
            "default": cfg.default_max_tokens,
        },
        "chunkSize": {
            "min": config::MIN_CHUNK_SIZE,
            "max": config::MAX_CHUNK_SIZE,
            "default": cfg.chunk_defaults.chunk_size,
        },
        "chunkOverlap": {
            "min": config::MIN_CHUNK_OVERLAP,
            "max": config::MAX_CHUNK_OVERLAP,
            "default": cfg.chunk_defaults.chunk_overlap,
        },
        "k": {
            "min": config::MIN_RETRIEVER_K,
            "max": config::MAX_RETRIEVER_K,
            "default": cfg.chunk_defaults.k,
        },
        "chainTypes": chain_types,
        "feedbackModes": feedback_modes,
        "providers": {
            "openai": cfg.provider_keys.get(Provider::OpenAI).is_some(),
            "anthropic": cfg.provider_keys.get(Provider::Anthropic).is_some(),
            "azure": cfg.azure.is_available(),
        },
        "tracingEnabled": cfg.tracing.is_enabled(),
        "tracingProject": cfg.tracing.project,
    }))
}
