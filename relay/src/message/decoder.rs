//! RFC 5322 header decoding using mailparse.
//!
//! Only the header block is interpreted. The body is kept as raw bytes since
//! the relay never looks inside it; subscribers fetch the stored original.

use mailparse::{parse_headers, MailParseError};
use thiserror::Error;
use tracing::debug;

use super::headers::HeaderMap;

/// A decoded inbound message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Header fields keyed by canonical name
    pub headers: HeaderMap,
    /// Bytes following the blank line that ends the header block
    pub body: Vec<u8>,
}

/// Reasons raw bytes are not a well-formed message.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,

    #[error("malformed header block: {0}")]
    Malformed(#[from] MailParseError),

    #[error("invalid header field name {0:?}")]
    InvalidFieldName(String),

    #[error("missing blank line between headers and body")]
    MissingSeparator,
}

/// Decode raw transport bytes into a [`Message`].
///
/// Fails when the input is empty, when a header line is not a valid
/// `name: value` field, or when the header block is not terminated by a
/// blank line.
pub fn decode(raw: &[u8]) -> Result<Message, ParseError> {
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }

    let (fields, body_start) = parse_headers(raw)?;

    if !ends_with_blank_line(&raw[..body_start]) {
        return Err(ParseError::MissingSeparator);
    }

    let mut headers = HeaderMap::new();
    for field in &fields {
        let name = field.get_key();
        if !is_valid_field_name(&name) {
            return Err(ParseError::InvalidFieldName(name));
        }
        headers.append(&name, field.get_value());
    }

    let body = raw[body_start..].to_vec();

    debug!(
        header_count = headers.len(),
        body_length = body.len(),
        "message_decoded"
    );

    Ok(Message { headers, body })
}

/// Field names are printable US-ASCII except the colon.
fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (33..=126).contains(&b) && b != b':')
}

fn ends_with_blank_line(head: &[u8]) -> bool {
    head == b"\n" || head == b"\r\n" || head.ends_with(b"\n\n") || head.ends_with(b"\n\r\n")
}
