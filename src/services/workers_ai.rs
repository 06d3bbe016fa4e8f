use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use crate::models::queue_item::ImageSource;
use crate::models::record::ExtractedRecord;
use crate::services::extractor::{
    read_json, record_from_model_output, ExtractionError, Extractor, RECEIPT_PROMPT,
};
use crate::services::progress::ProgressLog;

/// Public Workers AI endpoint; an AI Gateway URL can stand in for it.
pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4/accounts";

/// Client for a Cloudflare Workers AI vision model.
pub struct WorkersAiClient {
    http: Client,
    api_base: String,
    account_id: String,
    api_token: String,
    model: String,
}

#[derive(Deserialize)]
struct LlavaResponse {
    result: LlavaResult,
}

#[derive(Deserialize)]
struct LlavaResult {
    description: String,
}

impl WorkersAiClient {
    pub fn new(
        account_id: Option<&str>,
        api_token: Option<&str>,
        model: &str,
        request_timeout: Duration,
    ) -> Result<Self, ExtractionError> {
        let account_id = account_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ExtractionError::Config("CF_ACCOUNT_ID is not set".to_string()))?;
        let api_token = api_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ExtractionError::Config("CF_API_TOKEN is not set".to_string()))?;

        Ok(Self {
            http: Client::builder().timeout(request_timeout).build()?,
            api_base: DEFAULT_API_BASE.to_string(),
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
            model: model.to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn url(&self) -> String {
        format!("{}/{}/ai/run/{}", self.api_base, self.account_id, self.model)
    }
}

#[async_trait]
impl Extractor for WorkersAiClient {
    fn name(&self) -> &str {
        "workers_ai"
    }

    /// Send a receipt image to Workers AI and extract structured fields.
    async fn extract(
        &self,
        image: &ImageSource,
        log: &ProgressLog,
    ) -> Result<ExtractedRecord, ExtractionError> {
        log.push(format!("Sending {} to Workers AI ({})", image.file_name, self.model));

        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(&image.bytes),
            "prompt": RECEIPT_PROMPT,
            "max_tokens": 1024
        });

        let response = self
            .http
            .post(self.url())
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await?;

        let llava_resp: LlavaResponse = read_json(response).await?;

        Ok(record_from_model_output(&llava_resp.result.description, image))
    }
}
