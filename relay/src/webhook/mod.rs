//! Subscriber notification.
//!
//! ## Flow
//!
//! ```text
//! HeaderMap + token → WebhookPayload → sign → POST (retry) → subscriber
//! ```

pub mod delivery;
pub mod payload;
pub mod signature;

pub use delivery::{
    AttemptFailure, DeliveryError, HttpWebhookSender, RetryPolicy, WebhookRequest, WebhookSender,
};
pub use payload::{body_url, WebhookPayload};
pub use signature::{sign_payload, verify_signature};
