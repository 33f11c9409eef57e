//! Inbound message handling.
//!
//! Turns the raw bytes handed over by the SMTP server into a header map and
//! splits the reserved `mw-int-*` routing headers away from the headers that
//! are forwarded to the subscriber.
//!
//! ## Flow
//!
//! ```text
//! raw bytes → decode() → Message → extract() → (RoutingInfo, HeaderMap)
//! ```

pub mod decoder;
pub mod headers;

pub use decoder::{decode, Message, ParseError};
pub use headers::{extract, ExtractError, HeaderMap, MessageId, RoutingInfo, INT_HEADER_PREFIX};
