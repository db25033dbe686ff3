//! docchat core: configuration defaults, provider table, error taxonomy.

pub mod config;
pub mod error;

pub use config::{AppConfig, AzureSettings, ChunkParams, Provider, ProviderKeys, TracingSettings};
pub use error::{Error, Result};
