use std::collections::BTreeMap;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use tokio::time::sleep;

use crate::models::job::WebhookPayload;

/// Sends job completion notices to caller-supplied URLs.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: Client,
    backoff: ExponentialBuilder,
}

impl WebhookNotifier {
    /// `max_retries` extra attempts are made after the first failure, waiting
    /// `retry_base`, then twice that, and so on.
    pub fn new(timeout: Duration, max_retries: u32, retry_base: Duration) -> Result<Self, WebhookError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(WebhookError::Http)?;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(retry_base)
            .with_max_delay(Duration::from_secs(60))
            .with_max_times(max_retries as usize);

        Ok(Self { http, backoff })
    }

    /// POST the payload. Returns the last error if every attempt failed.
    pub async fn deliver(
        &self,
        target: &str,
        headers: &BTreeMap<String, String>,
        payload: &WebhookPayload,
    ) -> Result<(), WebhookError> {
        let headers = request_headers(headers);
        let attempt = || self.send_once(target, headers.clone(), payload);

        attempt
            .retry(self.backoff)
            .sleep(sleep)
            .notify(|err: &WebhookError, delay: Duration| {
                tracing::warn!(
                    job_id = %payload.job_id,
                    url = %target,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Webhook delivery failed, retrying"
                );
            })
            .await
    }

    async fn send_once(
        &self,
        target: &str,
        headers: HeaderMap,
        payload: &WebhookPayload,
    ) -> Result<(), WebhookError> {
        let response = self
            .http
            .post(target)
            .headers(headers)
            .json(payload)
            .send()
            .await
            .map_err(WebhookError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Caller headers with the body's content type pinned to JSON.
fn request_headers(raw: &BTreeMap<String, String>) -> HeaderMap {
    let mut headers = caller_headers(raw);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Convert caller headers, skipping names or values that are not valid HTTP.
fn caller_headers(raw: &BTreeMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in raw {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Ignoring invalid callback header"),
        }
    }
    headers
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook target responded with status {0}")]
    Status(u16),
}
