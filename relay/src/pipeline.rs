//! Delivery pipeline - one run per accepted message.
//!
//! ```text
//! RECEIVED → PARSED → STORED → NOTIFYING → DELIVERED | DELIVERY_ERROR → STATUS_REPORTED
//! ```
//!
//! Failures before the message is stored are returned to the SMTP layer as a
//! [`Rejection`] so the sender retries later. Once stored, the message is
//! accepted no matter what happens to the webhook; the outcome is only
//! recorded through the status reporter. A retransmitted message replaces the
//! stored copy and is announced again with its new token.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};
use url::Url;

use crate::config::Config;
use crate::message::{decode, extract, ExtractError, MessageId, ParseError, RoutingInfo};
use crate::status::{DeliveryOutcome, HttpStatusReporter, StatusReporter};
use crate::store::{BodyStore, FileBodyStore, RandomTokens, StorageError, TokenSource};
use crate::webhook::{
    DeliveryError, HttpWebhookSender, WebhookPayload, WebhookRequest, WebhookSender,
};

/// Transient rejection handed back to the SMTP layer.
///
/// Always answered with `451 4.3.0`: the sender keeps the message and may
/// retransmit it.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("failed to parse message: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to read routing headers: {0}")]
    Extract(#[from] ExtractError),

    #[error("failed to save email buffer: {0}")]
    Storage(#[from] StorageError),
}

impl Rejection {
    pub const REPLY_CODE: u16 = 451;
    pub const REPLY_TEXT: &'static str = "4.3.0 Internal server error";
}

/// What happened to an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    pub id: MessageId,
    pub outcome: DeliveryOutcome,
    /// Whether the status service acknowledged the outcome
    pub status_reported: bool,
}

/// Entry point the SMTP server calls once per received message.
#[async_trait]
pub trait MailHandler: Send + Sync {
    async fn handle(
        &self,
        origin: IpAddr,
        from: &str,
        to: &[String],
        raw: &[u8],
    ) -> Result<Disposition, Rejection>;
}

/// Settings that are not capabilities.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Host serving stored bodies, used in retrieval URLs
    pub storage_host: String,
    /// Ceiling on handling one message, measured from its arrival; webhook
    /// retries stop once it passes
    pub delivery_deadline: Duration,
}

/// The mail-to-webhook pipeline with its injected capabilities.
#[derive(Clone)]
pub struct Pipeline {
    settings: PipelineSettings,
    tokens: Arc<dyn TokenSource>,
    store: Arc<dyn BodyStore>,
    sender: Arc<dyn WebhookSender>,
    status: Arc<dyn StatusReporter>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        tokens: Arc<dyn TokenSource>,
        store: Arc<dyn BodyStore>,
        sender: Arc<dyn WebhookSender>,
        status: Arc<dyn StatusReporter>,
    ) -> Self {
        Self {
            settings,
            tokens,
            store,
            sender,
            status,
        }
    }

    /// Wire the production capabilities from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = HttpWebhookSender::build_client(config.webhook_timeout())
            .context("Failed to create HTTP client")?;
        let status_url =
            Url::parse(&config.status_url).context("Invalid MAILDB_STATUS_URL")?;

        Ok(Self::new(
            PipelineSettings {
                storage_host: config.instance_hostname.clone(),
                delivery_deadline: config.session_timeout(),
            },
            Arc::new(RandomTokens),
            Arc::new(FileBodyStore::new(
                config.maildb_root.clone(),
                config.staging_dir.clone(),
            )),
            Arc::new(HttpWebhookSender::new(client.clone(), config.retry_policy())),
            Arc::new(HttpStatusReporter::new(
                client,
                status_url,
                config.server_jwt.clone(),
            )),
        ))
    }

    /// Deliver the webhook before the deadline that started at `received`.
    async fn notify(
        &self,
        routing: &RoutingInfo,
        payload: &WebhookPayload,
        received: Instant,
    ) -> Result<(), DeliveryError> {
        let request = WebhookRequest {
            payload,
            endpoint: routing.webhook_url.as_deref(),
            id: &routing.id,
            domain: routing.domain.as_deref().unwrap_or_default(),
            send_date: &routing.send_date,
            secret: routing.webhook_secret.as_deref(),
        };

        let deadline = self.settings.delivery_deadline;
        let remaining = deadline.saturating_sub(received.elapsed());
        timeout(remaining, self.sender.deliver(&request))
            .await
            .unwrap_or(Err(DeliveryError::DeadlineExceeded(deadline)))
    }
}

#[async_trait]
impl MailHandler for Pipeline {
    async fn handle(
        &self,
        origin: IpAddr,
        from: &str,
        to: &[String],
        raw: &[u8],
    ) -> Result<Disposition, Rejection> {
        let received = Instant::now();

        info!(
            origin = %origin,
            from = %from,
            to = ?to,
            raw_length = raw.len(),
            "pipeline_message_received"
        );

        let message = match decode(raw) {
            Ok(m) => m,
            Err(e) => {
                error!(error = %e, "pipeline_parse_failed");
                return Err(e.into());
            }
        };

        let (routing, headers) = match extract(&message.headers) {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "pipeline_routing_headers_invalid");
                return Err(e.into());
            }
        };

        let token = self.tokens.generate();

        if let Err(e) = self.store.save(&routing.id, raw, &token).await {
            error!(message_id = %routing.id, error = %e, "pipeline_store_failed");
            return Err(e.into());
        }

        if let Err(e) = self.store.discard_staging(&routing.id).await {
            warn!(message_id = %routing.id, error = %e, "pipeline_staging_cleanup_failed");
        }

        let payload =
            WebhookPayload::build(headers, &routing.id, &self.settings.storage_host, &token);

        let outcome = match self.notify(&routing, &payload, received).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                warn!(message_id = %routing.id, error = %e, "pipeline_webhook_failed");
                DeliveryOutcome::DeliveryError
            }
        };

        let status_reported = match self
            .status
            .report(routing.domain.as_deref(), &routing.id, outcome)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    message_id = %routing.id,
                    outcome = %outcome,
                    error = %e,
                    "pipeline_status_update_failed"
                );
                false
            }
        };

        info!(
            message_id = %routing.id,
            outcome = %outcome,
            status_reported = status_reported,
            "pipeline_message_complete"
        );

        Ok(Disposition {
            id: routing.id,
            outcome,
            status_reported,
        })
    }
}
