//! Delivery status reporting to the mail database service.
//!
//! After the webhook attempt resolves, the outcome is recorded once through
//! `PUT {base}/domain/{domain}/update/{id}` with the server bearer token.
//! Reporting is best-effort: callers log failures and carry on.

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::message::MessageId;

/// Terminal result of notifying the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryOutcome {
    Delivered,
    DeliveryError,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "DELIVERED",
            DeliveryOutcome::DeliveryError => "DELIVERY_ERROR",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status update failures.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("message has no destination domain")]
    MissingDomain,

    #[error("status base URL cannot carry a path")]
    InvalidBaseUrl,

    #[error("status request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("status service returned {status}")]
    Rejected { status: u16 },
}

/// Records delivery outcomes, keyed by domain and message id.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(
        &self,
        domain: Option<&str>,
        id: &MessageId,
        outcome: DeliveryOutcome,
    ) -> Result<(), StatusError>;
}

#[derive(Debug, Serialize)]
struct StatusUpdate {
    status: DeliveryOutcome,
}

/// Status reporter talking to the mail database HTTP API.
#[derive(Clone)]
pub struct HttpStatusReporter {
    client: Client,
    base_url: Url,
    auth_token: String,
}

impl HttpStatusReporter {
    pub fn new(client: Client, base_url: Url, auth_token: impl Into<String>) -> Self {
        Self {
            client,
            base_url,
            auth_token: auth_token.into(),
        }
    }

    fn update_url(&self, domain: &str, id: &MessageId) -> Result<Url, StatusError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StatusError::InvalidBaseUrl)?;
            segments
                .pop_if_empty()
                .extend(["domain", domain, "update", id.as_str()]);
        }
        Ok(url)
    }
}

#[async_trait]
impl StatusReporter for HttpStatusReporter {
    async fn report(
        &self,
        domain: Option<&str>,
        id: &MessageId,
        outcome: DeliveryOutcome,
    ) -> Result<(), StatusError> {
        let domain = domain.ok_or(StatusError::MissingDomain)?;
        let url = self.update_url(domain, id)?;

        let resp = self
            .client
            .put(url)
            .bearer_auth(&self.auth_token)
            .json(&StatusUpdate { status: outcome })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StatusError::Rejected {
                status: status.as_u16(),
            });
        }

        info!(
            message_id = %id,
            domain = %domain,
            outcome = %outcome,
            "mail_status_updated"
        );

        Ok(())
    }
}
