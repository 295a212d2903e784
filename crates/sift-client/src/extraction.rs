use std::time::Duration;

use reqwest::multipart::Form;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sift_core::config::ExtractionConfig;
use sift_core::error::AppError;
use sift_core::traits::{ExtractionRequest, Extractor};
use url::Url;

/// Client for the AI extraction service.
///
/// Sends `content`, `url` and `api_key` as a multipart form to
/// `<endpoint>?model=<model>`. A 500 answer is retried after a fixed delay
/// until `max_attempts` is used up; any other non-200 answer fails at once.
#[derive(Clone)]
pub struct ExtractionClient {
    client: Client,
    endpoint: Url,
    max_attempts: u32,
    retry_delay: Duration,
    timeout_ms: u64,
}

#[derive(Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    json_data: serde_json::Value,
}

impl ExtractionClient {
    pub fn new(config: &ExtractionConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::NetworkError(e.to_string()))?;
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            AppError::ConfigError(format!("Invalid extraction endpoint {}: {e}", config.endpoint))
        })?;

        Ok(Self {
            client,
            endpoint,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
            timeout_ms: u64::try_from(config.request_timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn attempt(&self, request: &ExtractionRequest<'_>) -> Result<serde_json::Value, AppError> {
        let form = Form::new()
            .text("content", request.content.to_string())
            .text("url", request.url.to_string())
            .text("api_key", request.api_key.to_string());

        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("model", request.model);

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_ms)
                } else {
                    AppError::NetworkError(format!("Extraction request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status == StatusCode::OK {
            let body: ExtractionResponse = response.json().await.map_err(|e| {
                AppError::NetworkError(format!("Failed to read extraction response: {e}"))
            })?;
            return Ok(body.json_data);
        }

        let status_code = status.as_u16();
        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            Err(AppError::ExtractionRemoteFault {
                status_code,
                message,
            })
        } else {
            Err(AppError::ExtractionRejected {
                status_code,
                message,
            })
        }
    }
}

impl Extractor for ExtractionClient {
    async fn extract(&self, request: ExtractionRequest<'_>) -> Result<serde_json::Value, AppError> {
        let mut attempt = 1;
        loop {
            match self.attempt(&request).await {
                Err(AppError::ExtractionRemoteFault { message, .. })
                    if attempt < self.max_attempts =>
                {
                    tracing::warn!(
                        url = %request.url,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Extraction service returned 500, retrying: {message}"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                other => return other,
            }
        }
    }
}
