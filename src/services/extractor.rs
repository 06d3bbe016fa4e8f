//! Extraction backend contract, retry decorator and provider registry.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::{AppConfig, ExtractionProvider};
use crate::models::queue_item::ImageSource;
use crate::models::record::{ExtractedRecord, Fields};
use crate::services::ollama::OllamaClient;
use crate::services::progress::ProgressLog;
use crate::services::retry::{run_with_retry, RetryOptions, Transient, RETRYABLE_STATUSES};
use crate::services::workers_ai::WorkersAiClient;

/// Instructions shared by all vision backends.
pub const RECEIPT_PROMPT: &str = concat!(
    "Analyze this receipt image and extract the following fields as JSON: ",
    "merchant, date (ISO 8601), total (number), currency (ISO 4217), tax (number), ",
    "payment_method, line_items (array of objects with description, quantity, amount). ",
    "Use null for fields that are not visible. ",
    "Return ONLY valid JSON with these exact field names."
);

/// Turns a receipt image into a record.
///
/// Errors are reserved for transport and infrastructure failures; a receipt
/// the backend could not read comes back as a record with `status = error`.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        image: &ImageSource,
        log: &ProgressLog,
    ) -> Result<ExtractedRecord, ExtractionError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("Extraction backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Extraction request timed out")]
    Timeout,

    #[error("Connection to extraction backend lost: {0}")]
    ConnectionLost(io::ErrorKind),

    #[error("Unexpected extraction backend response: {0}")]
    Response(String),

    #[error("Extraction backend not configured: {0}")]
    Config(String),
}

/// Socket failures that usually clear up on a fresh connection.
const TRANSIENT_IO_KINDS: [io::ErrorKind; 5] = [
    io::ErrorKind::ConnectionReset,
    io::ErrorKind::ConnectionAborted,
    io::ErrorKind::BrokenPipe,
    io::ErrorKind::TimedOut,
    io::ErrorKind::UnexpectedEof,
];

/// First transient `io::Error` kind found anywhere in the source chain.
///
/// reqwest wraps socket errors several layers deep (client, hyper, io), so
/// `is_connect()` alone misses resets on an established connection.
pub fn transient_io_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if TRANSIENT_IO_KINDS.contains(&io_err.kind()) {
                return Some(io_err.kind());
            }
            // `io::Error::source` skips the wrapped error itself.
            if let Some(inner) = io_err.get_ref() {
                current = Some(inner as &(dyn StdError + 'static));
                continue;
            }
        }
        current = err.source();
    }
    None
}

impl From<reqwest::Error> for ExtractionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ExtractionError::Timeout;
        }
        match transient_io_kind(&err) {
            Some(io::ErrorKind::TimedOut) => ExtractionError::Timeout,
            Some(kind) => {
                tracing::debug!(error = ?err, "Extraction connection lost");
                ExtractionError::ConnectionLost(kind)
            }
            None => ExtractionError::Http(err),
        }
    }
}

impl Transient for ExtractionError {
    fn is_transient(&self) -> bool {
        match self {
            ExtractionError::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || transient_io_kind(err).is_some()
                    || err
                        .status()
                        .is_some_and(|status| RETRYABLE_STATUSES.contains(&status.as_u16()))
            }
            ExtractionError::Status { status, .. } => RETRYABLE_STATUSES.contains(&status.as_u16()),
            ExtractionError::Timeout | ExtractionError::ConnectionLost(_) => true,
            ExtractionError::Response(_) | ExtractionError::Config(_) => false,
        }
    }
}

/// Read a backend's JSON reply.
///
/// Body read failures keep their transport classification; only a body that
/// arrived intact but does not parse is a response error.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ExtractionError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ExtractionError::Status { status, body });
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ExtractionError::Response(e.to_string()))
}

#[async_trait]
impl<T: Extractor + ?Sized> Extractor for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn extract(
        &self,
        image: &ImageSource,
        log: &ProgressLog,
    ) -> Result<ExtractedRecord, ExtractionError> {
        (**self).extract(image, log).await
    }
}

/// Wraps an extractor so every call goes through the retry executor.
pub struct RetryingExtractor<E> {
    inner: E,
    options: RetryOptions,
}

impl<E: Extractor> RetryingExtractor<E> {
    pub fn new(inner: E, options: RetryOptions) -> Self {
        Self { inner, options }
    }
}

#[async_trait]
impl<E: Extractor> Extractor for RetryingExtractor<E> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn extract(
        &self,
        image: &ImageSource,
        log: &ProgressLog,
    ) -> Result<ExtractedRecord, ExtractionError> {
        run_with_retry(
            || self.inner.extract(image, log),
            &self.options,
            |retry| {
                tracing::warn!(
                    file = %image.file_name,
                    attempt = retry.attempt,
                    delay_ms = retry.delay.as_millis() as u64,
                    error = %retry.error,
                    "Retrying extraction"
                );
                log.push(format!(
                    "Retry attempt {}/{} for {} in {}ms: {}",
                    retry.attempt,
                    retry.max_retries,
                    image.file_name,
                    retry.delay.as_millis(),
                    retry.error
                ));
            },
        )
        .await
    }
}

/// Extractors by provider, resolved when a run starts.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<ExtractionProvider, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: ExtractionProvider, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.insert(provider, extractor);
        self
    }

    pub fn resolve(&self, provider: ExtractionProvider) -> Result<Arc<dyn Extractor>, ExtractionError> {
        self.extractors
            .get(&provider)
            .cloned()
            .ok_or_else(|| ExtractionError::Config(format!("no extractor registered for {provider}")))
    }

    pub fn providers(&self) -> Vec<ExtractionProvider> {
        self.extractors.keys().copied().collect()
    }

    /// Register every backend the configuration allows, each behind retries.
    ///
    /// A backend that cannot be built is skipped with a warning; selecting it
    /// later fails the run instead of the whole process.
    pub fn from_config(config: &AppConfig) -> Self {
        let retry = config.retry_options();
        let request_timeout = config.request_timeout();
        let worst_case = request_timeout * (retry.max_retries as u32 + 1);
        if worst_case >= Duration::from_secs(config.item_timeout_secs) {
            tracing::warn!(
                request_timeout_secs = config.request_timeout_secs,
                max_retries = retry.max_retries,
                item_timeout_secs = config.item_timeout_secs,
                "Item timeout leaves no room for every retry attempt"
            );
        }

        let mut registry = Self::new();

        match OllamaClient::new(&config.ollama_url, &config.ollama_model, request_timeout) {
            Ok(client) => {
                registry = registry.with(
                    ExtractionProvider::Ollama,
                    Arc::new(RetryingExtractor::new(client, retry)),
                );
            }
            Err(e) => tracing::warn!(error = %e, "Ollama extraction disabled"),
        }

        match WorkersAiClient::new(
            config.cf_account_id.as_deref(),
            config.cf_api_token.as_deref(),
            &config.cf_model,
            request_timeout,
        ) {
            Ok(client) => {
                registry = registry.with(
                    ExtractionProvider::WorkersAi,
                    Arc::new(RetryingExtractor::new(
                        client.with_api_base(&config.cf_api_base),
                        retry,
                    )),
                );
            }
            Err(e) => tracing::warn!(error = %e, "Workers AI extraction disabled"),
        }

        registry
    }
}

/// Build a record from a model's free-text answer.
///
/// The answer must contain a JSON object, optionally wrapped in a Markdown
/// code fence. Anything else becomes a record with `status = error`.
pub fn record_from_model_output(output: &str, image: &ImageSource) -> ExtractedRecord {
    match parse_fields(output) {
        Ok(fields) => ExtractedRecord::draft(fields, image.data_url()),
        Err(reason) => ExtractedRecord::failed(reason, image.data_url()),
    }
}

fn parse_fields(output: &str) -> Result<Fields, String> {
    let trimmed = output.trim();
    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err("Model response did not contain a JSON object".to_string()),
    };
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| format!("Model response was not valid JSON: {e}"))?;
    match value {
        serde_json::Value::Object(map) if map.is_empty() => {
            Err("Model response contained no receipt fields".to_string())
        }
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err("Model response was not a JSON object".to_string()),
    }
}
