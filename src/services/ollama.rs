use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::queue_item::ImageSource;
use crate::models::record::ExtractedRecord;
use crate::services::extractor::{
    read_json, record_from_model_output, ExtractionError, Extractor, RECEIPT_PROMPT,
};
use crate::services::progress::ProgressLog;

/// Client for a vision model served by a local Ollama instance.
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    format: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, request_timeout: Duration) -> Result<Self, ExtractionError> {
        Ok(Self {
            http: Client::builder().timeout(request_timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Extractor for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn extract(
        &self,
        image: &ImageSource,
        log: &ProgressLog,
    ) -> Result<ExtractedRecord, ExtractionError> {
        log.push(format!("Sending {} to Ollama ({})", image.file_name, self.model));

        let request = GenerateRequest {
            model: &self.model,
            prompt: RECEIPT_PROMPT,
            images: vec![base64::engine::general_purpose::STANDARD.encode(&image.bytes)],
            format: "json",
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        let generated: GenerateResponse = read_json(response).await?;

        Ok(record_from_model_output(&generated.response, image))
    }
}
