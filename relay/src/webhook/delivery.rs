//! Webhook delivery with bounded retry.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};
use url::Url;

use super::payload::WebhookPayload;
use super::signature::sign_payload;
use crate::message::MessageId;

pub const HEADER_DOMAIN: &str = "Mw-Domain";
pub const HEADER_ID: &str = "Mw-Id";
pub const HEADER_SIGNATURE: &str = "Mw-Signature";
pub const HEADER_DATE: &str = "Mw-Date";

/// Exponential backoff settings for webhook attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Wait after the first failed attempt
    pub min_wait: Duration,
    /// Upper bound for any single wait
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following failed attempt number `attempt`
    /// (1-based): `min_wait * 2^(attempt - 1)`, capped at `max_wait`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.min_wait.saturating_mul(factor).min(self.max_wait)
    }
}

/// Why a single attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    Status(u16),
    Transport(String),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Status(code) => write!(f, "status {}", code),
            AttemptFailure::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

/// Webhook delivery failures.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid webhook endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("could not serialize request payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not sign request payload")]
    Signing,

    #[error("could not build request: {0}")]
    Request(#[source] reqwest::Error),

    #[error("webhook returned {status}")]
    Rejected { status: u16 },

    #[error("webhook failed after {attempts} attempts, last failure: {last}")]
    Exhausted { attempts: u32, last: AttemptFailure },

    #[error("webhook delivery exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

/// Everything needed to notify one subscriber about one message.
#[derive(Clone, Copy)]
pub struct WebhookRequest<'a> {
    pub payload: &'a WebhookPayload,
    pub endpoint: Option<&'a str>,
    pub id: &'a MessageId,
    pub domain: &'a str,
    pub send_date: &'a str,
    pub secret: Option<&'a str>,
}

/// Delivers notifications to subscriber endpoints.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn deliver(&self, request: &WebhookRequest<'_>) -> Result<(), DeliveryError>;
}

/// HTTP webhook sender sharing one pooled client across all messages.
#[derive(Debug, Clone)]
pub struct HttpWebhookSender {
    client: Client,
    retry: RetryPolicy,
}

impl HttpWebhookSender {
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Build the shared client with a per-attempt timeout.
    pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
        Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(100)
            .build()
    }

    /// Send one attempt and classify the outcome.
    ///
    /// `Ok(None)` is success, `Ok(Some(_))` a transient failure worth
    /// retrying, `Err(_)` a failure that retrying cannot fix.
    async fn attempt(
        &self,
        endpoint: &Url,
        request: &WebhookRequest<'_>,
        body: &[u8],
        signature: Option<&str>,
        attempt: u32,
    ) -> Result<Option<AttemptFailure>, DeliveryError> {
        let mut builder = self
            .client
            .post(endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(HEADER_DOMAIN, request.domain)
            .header(HEADER_ID, request.id.as_str())
            .header(HEADER_DATE, request.send_date)
            .body(body.to_vec());

        if let Some(signature) = signature {
            builder = builder.header(HEADER_SIGNATURE, signature);
        }

        match builder.send().await {
            Ok(resp) => {
                let status = resp.status();

                info!(
                    message_id = %request.id,
                    attempt = attempt,
                    status_code = status.as_u16(),
                    "webhook_response"
                );

                if status.is_success() {
                    Ok(None)
                } else if is_retryable(status) {
                    Ok(Some(AttemptFailure::Status(status.as_u16())))
                } else {
                    Err(DeliveryError::Rejected {
                        status: status.as_u16(),
                    })
                }
            }
            Err(e) if e.is_builder() => Err(DeliveryError::Request(e)),
            Err(e) => {
                if e.is_timeout() {
                    warn!(
                        message_id = %request.id,
                        attempt = attempt,
                        error = %e,
                        "webhook_attempt_timeout"
                    );
                } else {
                    warn!(
                        message_id = %request.id,
                        attempt = attempt,
                        error = %e,
                        "webhook_attempt_error"
                    );
                }
                Ok(Some(AttemptFailure::Transport(e.to_string())))
            }
        }
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn deliver(&self, request: &WebhookRequest<'_>) -> Result<(), DeliveryError> {
        let endpoint = parse_endpoint(request.endpoint)?;
        let body = serde_json::to_vec(request.payload)?;

        let signature = match request.secret {
            Some(secret) => {
                Some(sign_payload(secret, &body).map_err(|_| DeliveryError::Signing)?)
            }
            None => {
                warn!(message_id = %request.id, "webhook_secret_missing");
                None
            }
        };

        info!(
            message_id = %request.id,
            endpoint = %endpoint,
            body_length = body.len(),
            signed = signature.is_some(),
            "webhook_delivery_start"
        );

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let failure = match self
                .attempt(&endpoint, request, &body, signature.as_deref(), attempt)
                .await?
            {
                None => {
                    info!(message_id = %request.id, attempts = attempt, "webhook_delivered");
                    return Ok(());
                }
                Some(failure) => failure,
            };

            if attempt >= max_attempts {
                error!(
                    message_id = %request.id,
                    attempts = attempt,
                    last_failure = %failure,
                    "webhook_retries_exhausted"
                );
                return Err(DeliveryError::Exhausted {
                    attempts: attempt,
                    last: failure,
                });
            }

            let wait = self.retry.backoff(attempt);
            warn!(
                message_id = %request.id,
                attempt = attempt,
                failure = %failure,
                wait_ms = wait.as_millis() as u64,
                "webhook_attempt_failed"
            );
            sleep(wait).await;
        }
    }
}

/// Network errors are handled by the caller; here only statuses that may
/// succeed on a later attempt are retryable.
fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
}

fn parse_endpoint(raw: Option<&str>) -> Result<Url, DeliveryError> {
    let invalid = |url: &str, reason: String| DeliveryError::InvalidEndpoint {
        url: url.to_string(),
        reason,
    };

    let raw = raw.ok_or_else(|| invalid("", "missing Mw-Int-Webhook-Url header".to_string()))?;
    let url = Url::parse(raw).map_err(|e| invalid(raw, e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(raw, format!("unsupported scheme {}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid(raw, "missing host".to_string()));
    }

    Ok(url)
}
