//! Live processing settings.
//!
//! Settings are published on a `watch` channel. The batch scheduler reads the
//! current value once when a run starts, so an update takes effect on the
//! next run and never inside one.

use std::sync::Arc;
use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::watch;

/// Extraction backend selection.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtractionProvider {
    /// Cloudflare Workers AI multimodal model.
    #[default]
    WorkersAi,
    /// Local Ollama server.
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ProcessingSettings {
    /// Images extracted concurrently per slice.
    #[garde(range(min = 1, max = 64))]
    pub concurrency_limit: usize,

    #[garde(skip)]
    pub provider: ExtractionProvider,

    /// Per-item extraction timeout, retries included.
    #[garde(range(min = 1, max = 3600))]
    pub item_timeout_secs: u64,
}

impl ProcessingSettings {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 3,
            provider: ExtractionProvider::default(),
            item_timeout_secs: 120,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid processing settings: {0}")]
    Invalid(#[from] garde::Report),
}

/// Shared handle to the live settings.
#[derive(Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<ProcessingSettings>>,
}

impl SettingsHandle {
    pub fn new(initial: ProcessingSettings) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> ProcessingSettings {
        self.tx.borrow().clone()
    }

    /// Validate and publish new settings.
    pub fn update(&self, settings: ProcessingSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        tracing::info!(
            concurrency_limit = settings.concurrency_limit,
            provider = %settings.provider,
            item_timeout_secs = settings.item_timeout_secs,
            "Processing settings updated"
        );
        self.tx.send_replace(settings);
        Ok(())
    }
}
