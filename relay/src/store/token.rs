//! Access tokens guarding stored message bodies.

use std::fmt;

use rand::RngCore;

/// Number of random bytes in a token.
pub const TOKEN_BYTES: usize = 32;

/// Hex encoded random token bound to one stored message.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn from_bytes(bytes: [u8; TOKEN_BYTES]) -> Self {
        AccessToken(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Source of fresh access tokens, one per stored message.
pub trait TokenSource: Send + Sync {
    fn generate(&self) -> AccessToken;
}

/// Tokens from the thread-local CSPRNG, which is seeded from the OS once per
/// thread and safe to call from concurrent pipelines.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokens;

impl TokenSource for RandomTokens {
    fn generate(&self) -> AccessToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        AccessToken::from_bytes(bytes)
    }
}
