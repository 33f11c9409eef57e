//! Webhook notification payload.

use serde::Serialize;

use crate::message::{HeaderMap, MessageId};
use crate::store::AccessToken;

/// JSON body POSTed to the subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    /// Message headers with the reserved namespace removed
    pub headers: HeaderMap,
    /// Token-bearing URL the subscriber uses to fetch the stored message
    #[serde(rename = "bodyURL")]
    pub body_url: String,
}

impl WebhookPayload {
    pub fn build(
        headers: HeaderMap,
        id: &MessageId,
        storage_host: &str,
        token: &AccessToken,
    ) -> Self {
        Self {
            headers,
            body_url: body_url(storage_host, id, token),
        }
    }
}

/// Retrieval URL for a stored message.
///
/// Message ids and tokens only contain URL-safe characters, so no escaping is
/// needed.
pub fn body_url(storage_host: &str, id: &MessageId, token: &AccessToken) -> String {
    format!(
        "https://{}/db/email/{}?token={}",
        storage_host,
        id,
        token.as_str()
    )
}
