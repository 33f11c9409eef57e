//! Mailway relay - mail-to-webhook delivery.
//!
//! Each accepted SMTP message is stored with a one-time access token, then
//! its headers are POSTed (signed) to the subscriber's webhook together with
//! a URL for fetching the body. The outcome is reported to the status
//! service.
//!
//! ## Architecture
//!
//! ```text
//! SMTP (mailin) → Pipeline → BodyStore → WebhookSender → StatusReporter
//! ```

pub mod config;
pub mod message;
pub mod pipeline;
pub mod server;
pub mod status;
pub mod store;
pub mod webhook;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use message::{decode, extract, HeaderMap, MessageId, RoutingInfo};
pub use pipeline::{Disposition, MailHandler, Pipeline, PipelineSettings, Rejection};
pub use status::{DeliveryOutcome, HttpStatusReporter, StatusReporter};
pub use store::{AccessToken, BodyStore, FileBodyStore, RandomTokens, TokenSource};
pub use webhook::{HttpWebhookSender, RetryPolicy, WebhookPayload, WebhookSender};
