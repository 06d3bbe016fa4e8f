use std::time::Duration;

use serde::Deserialize;

use crate::services::retry::RetryOptions;

pub mod settings;

pub use settings::{ExtractionProvider, ProcessingSettings, SettingsError, SettingsHandle};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite connection string for the local record store
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Backend used by runs until changed through the settings API
    #[serde(default)]
    pub extraction_provider: ExtractionProvider,

    /// Cloudflare account ID
    pub cf_account_id: Option<String>,

    /// Cloudflare Workers AI API token
    pub cf_api_token: Option<String>,

    /// Workers AI endpoint base, e.g. an AI Gateway URL
    #[serde(default = "default_cf_api_base")]
    pub cf_api_base: String,

    /// Workers AI vision model
    #[serde(default = "default_cf_model")]
    pub cf_model: String,

    /// Base URL of a local Ollama server
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Ollama vision model
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,

    /// Initial number of images extracted concurrently per slice
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Upper bound for one item's extraction, retries included
    #[serde(default = "default_item_timeout_secs")]
    pub item_timeout_secs: u64,

    /// Upper bound for a single backend request; a stall past it is retried
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub retry_max_retries: usize,

    #[serde(default = "default_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub retry_backoff_multiplier: f32,

    /// Maximum accepted upload body size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_url() -> String {
    "sqlite://receipts.db".to_string()
}

fn default_cf_api_base() -> String {
    crate::services::workers_ai::DEFAULT_API_BASE.to_string()
}

fn default_cf_model() -> String {
    "@cf/llava-hf/llava-1.5-7b-hf".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llava".to_string()
}

fn default_concurrency_limit() -> usize {
    3
}

fn default_item_timeout_secs() -> u64 {
    120
}

fn default_request_timeout_secs() -> u64 {
    25
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f32 {
    2.0
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            max_retries: self.retry_max_retries,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Settings the first run starts with.
    pub fn initial_settings(&self) -> ProcessingSettings {
        ProcessingSettings {
            concurrency_limit: self.concurrency_limit,
            provider: self.extraction_provider,
            item_timeout_secs: self.item_timeout_secs,
        }
    }
}
