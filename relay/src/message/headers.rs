//! Header map and reserved routing header extraction.
//!
//! Upstream services attach routing metadata to every message using headers in
//! the reserved `Mw-Int-*` namespace. Those headers are read once and never
//! forwarded to the subscriber.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Reserved header prefix, lowercase for case-insensitive matching.
pub const INT_HEADER_PREFIX: &str = "mw-int-";

pub const MW_ID: &str = "Mw-Int-Id";
pub const MW_DOMAIN: &str = "Mw-Int-Domain";
pub const MW_WEBHOOK_URL: &str = "Mw-Int-Webhook-Url";
pub const MW_WEBHOOK_SECRET_TOKEN: &str = "Mw-Int-Webhook-Secret-Token";

/// Send date sources, most specific first.
const DATE_HEADERS: &[&str] = &["Mw-Int-Date", "Mw-Date", "Date"];

const MAX_ID_LENGTH: usize = 255;

/// Header fields keyed by canonical MIME name.
///
/// Lookups are case-insensitive because every key is canonicalized on the
/// way in (`content-type` and `CONTENT-TYPE` both become `Content-Type`).
/// Serializes as a JSON object of name to list of values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HeaderMap(BTreeMap<String, Vec<String>>);

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, keeping earlier values for the same name.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .entry(canonical_key(name))
            .or_default()
            .push(value.into());
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&canonical_key(name))
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values for `name`, in arrival order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.0
            .get(&canonical_key(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&canonical_key(name))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build a new map holding only the fields whose name does not start
    /// with `prefix`, compared case-insensitively.
    pub fn without_prefix(&self, prefix: &str) -> HeaderMap {
        let prefix = prefix.to_ascii_lowercase();
        HeaderMap(
            self.0
                .iter()
                .filter(|(name, _)| !name.to_ascii_lowercase().starts_with(&prefix))
                .map(|(name, values)| (name.clone(), values.clone()))
                .collect(),
        )
    }
}

/// Canonical MIME form: first letter and every letter after a hyphen in
/// upper case, everything else lower case.
fn canonical_key(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

/// Errors reading the reserved routing headers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("missing Mw-Int-Id header")]
    MissingId,

    #[error("invalid message id {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },
}

/// Upstream-assigned message identifier.
///
/// Used as the storage filename stem and as a URL path segment, so it is
/// restricted to a conservative character set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn parse(raw: &str) -> Result<Self, ExtractError> {
        let invalid = |reason| ExtractError::InvalidId {
            id: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return Err(ExtractError::MissingId);
        }
        if raw.len() > MAX_ID_LENGTH {
            return Err(invalid("too long"));
        }
        if raw == "." || raw == ".." {
            return Err(invalid("reserved path component"));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+'))
        {
            return Err(invalid("unsupported character"));
        }

        Ok(MessageId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routing metadata read from the reserved headers.
#[derive(Clone)]
pub struct RoutingInfo {
    pub id: MessageId,
    /// Destination domain, used for the `Mw-Domain` header and status updates
    pub domain: Option<String>,
    /// Subscriber webhook endpoint
    pub webhook_url: Option<String>,
    /// Subscriber shared secret for payload signing
    pub webhook_secret: Option<String>,
    /// Original send date, empty when the message carries none
    pub send_date: String,
}

impl fmt::Debug for RoutingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingInfo")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .field("webhook_url", &self.webhook_url)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("send_date", &self.send_date)
            .finish()
    }
}

/// Read the routing headers and return them along with the headers that may
/// be forwarded to the subscriber.
///
/// The returned map never contains a field in the reserved namespace,
/// whatever its original casing.
pub fn extract(headers: &HeaderMap) -> Result<(RoutingInfo, HeaderMap), ExtractError> {
    let id = match field(headers, MW_ID) {
        Some(raw) => MessageId::parse(&raw)?,
        None => {
            warn!("message_id_header_missing");
            return Err(ExtractError::MissingId);
        }
    };

    let send_date = DATE_HEADERS
        .iter()
        .find_map(|name| field(headers, name))
        .unwrap_or_default();

    let routing = RoutingInfo {
        domain: field(headers, MW_DOMAIN),
        webhook_url: field(headers, MW_WEBHOOK_URL),
        webhook_secret: field(headers, MW_WEBHOOK_SECRET_TOKEN),
        send_date,
        id,
    };

    let forwarded = headers.without_prefix(INT_HEADER_PREFIX);

    info!(
        message_id = %routing.id,
        domain = ?routing.domain,
        has_webhook_url = routing.webhook_url.is_some(),
        has_webhook_secret = routing.webhook_secret.is_some(),
        stripped_count = headers.len() - forwarded.len(),
        "routing_headers_extracted"
    );

    Ok((routing, forwarded))
}

/// Trimmed first value, treating empty values as absent.
fn field(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
