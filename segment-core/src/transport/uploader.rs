//! HTTP upload of serialized batches
//!
//! Implements the batch endpoint of the tracking API:
//! `POST {base_url}/v1/batch` with HTTP Basic auth (write key as user name,
//! empty password). Any 2xx response counts as delivered.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Sends one serialized batch to the collection endpoint
#[async_trait]
pub trait BatchUploader: Send + Sync {
    /// Upload a `{"batch":[...],"sentAt":...}` body. Resolves once the
    /// endpoint accepted it, or with the error that stopped it.
    async fn upload(&self, body: Vec<u8>) -> Result<()>;
}

/// reqwest-backed uploader with retry on transient failures
pub struct HttpUploader {
    http_client: reqwest::Client,
    batch_url: String,
    write_key: String,
    max_retries: usize,
}

/// Outcome of one failed attempt
struct AttemptError {
    error: Error,
    retryable: bool,
}

impl HttpUploader {
    /// Create a new uploader from configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let write_key = config.write_key()?.to_string();
        let batch_url = format!("{}/v1/batch", config.base_url.trim_end_matches('/'));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("segment-rs/", env!("CARGO_PKG_VERSION"))),
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            batch_url,
            write_key,
            max_retries: config.max_retries,
        })
    }

    /// The full URL batches are posted to
    pub fn batch_url(&self) -> &str {
        &self.batch_url
    }

    async fn send_batch(&self, body: Vec<u8>) -> std::result::Result<(), AttemptError> {
        let response = self
            .http_client
            .post(&self.batch_url)
            .basic_auth(&self.write_key, Some(""))
            .body(body)
            .send()
            .await
            .map_err(|e| AttemptError {
                error: Error::Transport(format!("HTTP request failed: {}", e)),
                retryable: true,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        Err(AttemptError {
            error: Error::Transport(format!("API error ({}): {}", status, error_text)),
            retryable: is_retryable_status(status),
        })
    }
}

#[async_trait]
impl BatchUploader for HttpUploader {
    /// Retries transient failures (network errors, 5xx, 429) with exponential backoff.
    async fn upload(&self, body: Vec<u8>) -> Result<()> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    "Retrying batch upload (attempt {}/{}), waiting {:?}",
                    attempt + 1,
                    self.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            match self.send_batch(body.clone()).await {
                Ok(()) => return Ok(()),
                Err(AttemptError {
                    error,
                    retryable: true,
                }) => {
                    tracing::warn!("Transient error uploading batch: {}", error);
                    last_error = Some(error);
                }
                Err(AttemptError { error, .. }) => return Err(error),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Transport("max retries exceeded".to_string())))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
