//! Filesystem body store.
//!
//! Layout: `{root}/{id}.eml` holding
//!
//! ```text
//! Mw-Int-Maildb-Secret-Token: {token}\r\n
//! {raw message bytes}
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{AccessToken, BodyStore, StorageError};
use crate::message::MessageId;
use crate::webhook::signature::constant_time_compare;

/// Name of the verification line written ahead of the message.
pub const MW_BODY_SECRET_TOKEN: &str = "Mw-Int-Maildb-Secret-Token";

const CRLF: &str = "\r\n";

/// Stores messages as flat `.eml` files under a root directory.
#[derive(Debug, Clone)]
pub struct FileBodyStore {
    root: PathBuf,
    staging_dir: PathBuf,
}

impl FileBodyStore {
    pub fn new(root: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staging_dir: staging_dir.into(),
        }
    }

    /// Final location of a stored message.
    pub fn path_for(&self, id: &MessageId) -> PathBuf {
        self.root.join(format!("{}.eml", id))
    }

    /// Location of the copy the SMTP layer stages before handing over.
    pub fn staging_path_for(&self, id: &MessageId) -> PathBuf {
        self.staging_dir.join(format!("{}.eml", id))
    }

    /// Hidden sibling of the final path; the rename keeps readers from ever
    /// seeing a partially written file.
    fn temp_path_for(&self, id: &MessageId, token: &AccessToken) -> PathBuf {
        self.root.join(format!(".{}.{}.tmp", id, &token.as_str()[..8]))
    }

    /// Read a stored message if `presented` matches its verification token.
    ///
    /// Returns `Ok(None)` when the message does not exist or the token does
    /// not match, so callers cannot tell the two apart.
    pub async fn read_verified(
        &self,
        id: &MessageId,
        presented: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(id);

        let contents = match fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Read { path, source }),
        };

        let (stored_token, body_start) = match split_verification_line(&contents) {
            Some(parts) => parts,
            None => return Err(StorageError::MissingVerification(path)),
        };

        if !constant_time_compare(stored_token, presented) {
            warn!(message_id = %id, "maildb_token_mismatch");
            return Ok(None);
        }

        Ok(Some(contents[body_start..].to_vec()))
    }

    async fn write_new(&self, path: &Path, contents: &[u8]) -> Result<(), StorageError> {
        let write_err = |source| StorageError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut file = fs::File::create(path).await.map_err(write_err)?;
        file.write_all(contents).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        Ok(())
    }
}

/// Split `{name}: {token}\r\n{body}` into the token and the body offset.
fn split_verification_line(contents: &[u8]) -> Option<(&str, usize)> {
    let line_end = contents.windows(2).position(|w| w == CRLF.as_bytes())?;
    let line = std::str::from_utf8(&contents[..line_end]).ok()?;
    let token = line
        .strip_prefix(MW_BODY_SECRET_TOKEN)?
        .strip_prefix(':')?
        .trim();
    Some((token, line_end + CRLF.len()))
}

#[async_trait]
impl BodyStore for FileBodyStore {
    async fn save(
        &self,
        id: &MessageId,
        raw: &[u8],
        token: &AccessToken,
    ) -> Result<(), StorageError> {
        let dest = self.path_for(id);

        let verification = format!("{}: {}{}", MW_BODY_SECRET_TOKEN, token.as_str(), CRLF);
        let mut contents = Vec::with_capacity(verification.len() + raw.len());
        contents.extend_from_slice(verification.as_bytes());
        contents.extend_from_slice(raw);

        let temp = self.temp_path_for(id, token);
        self.write_new(&temp, &contents).await?;

        // rename replaces an earlier copy of the same id in one step
        if let Err(source) = fs::rename(&temp, &dest).await {
            if let Err(e) = fs::remove_file(&temp).await {
                warn!(path = %temp.display(), error = %e, "maildb_temp_cleanup_failed");
            }
            return Err(StorageError::Write { path: dest, source });
        }

        info!(
            message_id = %id,
            path = %dest.display(),
            size = contents.len(),
            "maildb_message_saved"
        );

        Ok(())
    }

    async fn discard_staging(&self, id: &MessageId) -> Result<(), StorageError> {
        let path = self.staging_path_for(id);

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "staging_file_deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Delete { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::store::{RandomTokens, TokenSource};

    fn store_in(dir: &TempDir) -> FileBodyStore {
        FileBodyStore::new(dir.path().join("maildb"), dir.path().join("staging"))
    }

    async fn prepared(dir: &TempDir) -> FileBodyStore {
        let store = store_in(dir);
        fs::create_dir_all(dir.path().join("maildb")).await.unwrap();
        fs::create_dir_all(dir.path().join("staging")).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_save_writes_verification_line_then_raw_message() {
        let dir = TempDir::new().unwrap();
        let store = prepared(&dir).await;
        let id = MessageId::parse("abc123").unwrap();
        let token = RandomTokens.generate();
        let raw = b"Subject: Hi\r\n\r\nhello";

        store.save(&id, raw, &token).await.unwrap();

        let contents = std::fs::read(dir.path().join("maildb/abc123.eml")).unwrap();
        let expected_line = format!("Mw-Int-Maildb-Secret-Token: {}\r\n", token.as_str());
        assert!(contents.starts_with(expected_line.as_bytes()));
        assert_eq!(&contents[expected_line.len()..], raw);
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = prepared(&dir).await;
        let id = MessageId::parse("abc123").unwrap();

        store.save(&id, b"x", &RandomTokens.generate()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path().join("maildb"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["abc123.eml".to_string()]);
    }

    #[tokio::test]
    async fn test_save_replaces_existing_id() {
        let dir = TempDir::new().unwrap();
        let store = prepared(&dir).await;
        let id = MessageId::parse("abc123").unwrap();
        let first = RandomTokens.generate();
        let second = RandomTokens.generate();

        store.save(&id, b"Subject: x\r\n\r\nfirst", &first).await.unwrap();
        store.save(&id, b"Subject: x\r\n\r\nsecond", &second).await.unwrap();

        assert!(store.read_verified(&id, first.as_str()).await.unwrap().is_none());
        let body = store.read_verified(&id, second.as_str()).await.unwrap();
        assert_eq!(body.as_deref(), Some(&b"Subject: x\r\n\r\nsecond"[..]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_of_same_id_leave_one_whole_copy() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(prepared(&dir).await);
        let id = MessageId::parse("abc123").unwrap();

        for round in 0..50 {
            let writers: Vec<_> = (0..2)
                .map(|writer| {
                    let store = Arc::clone(&store);
                    let id = id.clone();
                    let token = RandomTokens.generate();
                    let raw = format!("Subject: round {}\r\n\r\nwriter {}", round, writer);
                    tokio::spawn(async move {
                        let result = store.save(&id, raw.as_bytes(), &token).await;
                        result.map(|()| (token, raw))
                    })
                })
                .collect();

            let mut saved = Vec::new();
            for writer in writers {
                saved.push(writer.await.unwrap().unwrap());
            }

            // Exactly one writer's token unlocks the file, and it returns that
            // writer's bytes untouched
            let mut readable = 0;
            for (token, raw) in &saved {
                if let Some(body) = store.read_verified(&id, token.as_str()).await.unwrap() {
                    assert_eq!(body, raw.as_bytes());
                    readable += 1;
                }
            }
            assert_eq!(readable, 1);
        }

        let names: Vec<String> = std::fs::read_dir(dir.path().join("maildb"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["abc123.eml".to_string()]);
    }

    #[tokio::test]
    async fn test_save_fails_without_root() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let id = MessageId::parse("abc123").unwrap();

        let result = store.save(&id, b"x", &RandomTokens.generate()).await;

        assert!(matches!(result, Err(StorageError::Write { .. })));
    }

    #[tokio::test]
    async fn test_read_verified() {
        let dir = TempDir::new().unwrap();
        let store = prepared(&dir).await;
        let id = MessageId::parse("abc123").unwrap();
        let token = RandomTokens.generate();
        store.save(&id, b"Subject: Hi\r\n\r\nhello", &token).await.unwrap();

        let body = store.read_verified(&id, token.as_str()).await.unwrap();
        assert_eq!(body.as_deref(), Some(&b"Subject: Hi\r\n\r\nhello"[..]));

        let wrong = RandomTokens.generate();
        assert!(store.read_verified(&id, wrong.as_str()).await.unwrap().is_none());

        let missing = MessageId::parse("nope").unwrap();
        assert!(store.read_verified(&missing, token.as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_verified_rejects_file_without_verification_line() {
        let dir = TempDir::new().unwrap();
        let store = prepared(&dir).await;
        std::fs::write(dir.path().join("maildb/raw.eml"), b"Subject: Hi\r\n\r\nbody").unwrap();
        let id = MessageId::parse("raw").unwrap();

        let result = store.read_verified(&id, "anything").await;

        assert!(matches!(result, Err(StorageError::MissingVerification(_))));
    }

    #[tokio::test]
    async fn test_discard_staging() {
        let dir = TempDir::new().unwrap();
        let store = prepared(&dir).await;
        let id = MessageId::parse("abc123").unwrap();
        let staged = dir.path().join("staging/abc123.eml");
        std::fs::write(&staged, b"staged").unwrap();

        store.discard_staging(&id).await.unwrap();
        assert!(!staged.exists());

        // Already gone is not an error
        store.discard_staging(&id).await.unwrap();
    }

    #[test]
    fn test_split_verification_line() {
        let contents = b"Mw-Int-Maildb-Secret-Token: abcd\r\nSubject: x\r\n";

        let (token, start) = split_verification_line(contents).unwrap();

        assert_eq!(token, "abcd");
        assert_eq!(&contents[start..], b"Subject: x\r\n");
        assert!(split_verification_line(b"Subject: x\r\n\r\n").is_none());
        assert!(split_verification_line(b"no line ending").is_none());
    }
}
