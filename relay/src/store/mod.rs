//! Message body storage.
//!
//! Every accepted message is written to the mail database directory under its
//! id, prefixed by a verification line holding a fresh access token. The
//! retrieval service hands the body out only to callers presenting that
//! token.

pub mod file;
pub mod token;

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::MessageId;

pub use file::{FileBodyStore, MW_BODY_SECRET_TOKEN};
pub use token::{AccessToken, RandomTokens, TokenSource, TOKEN_BYTES};

/// Storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("could not write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not delete {}: {source}", .path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} has no verification line", .0.display())]
    MissingVerification(PathBuf),
}

/// Persistence for raw messages.
#[async_trait]
pub trait BodyStore: Send + Sync {
    /// Persist the raw message bound to `token`.
    async fn save(
        &self,
        id: &MessageId,
        raw: &[u8],
        token: &AccessToken,
    ) -> Result<(), StorageError>;

    /// Remove the staging copy the SMTP layer left behind for `id`.
    async fn discard_staging(&self, id: &MessageId) -> Result<(), StorageError>;
}
