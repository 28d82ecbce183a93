//! Receive Session
//!
//! Server half of one upload: verifies each chunk frame against the
//! session key, appends accepted chunks to a scratch file, and commits the
//! file over the destination once every chunk has arrived.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;

use super::paths::UploadTarget;
use crate::upload::{close_code, split_frame, verify_tag, Handshake, SessionKey};

/// Receive-side failures, each ending the connection with a close code
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Storage error: {0}")]
    Storage(#[source] std::io::Error),

    #[error("Failed to commit upload: {0}")]
    Commit(#[source] std::io::Error),
}

impl ReceiveError {
    pub fn close_code(&self) -> u16 {
        match self {
            Self::InvalidHandshake(_) | Self::Protocol(_) => close_code::POLICY_VIOLATION,
            Self::Storage(_) | Self::Commit(_) => close_code::INTERNAL_ERROR,
        }
    }
}

/// Decode the opening control message into `(key, count)`
pub fn parse_handshake(text: &str) -> Result<(SessionKey, u64), ReceiveError> {
    let handshake: Handshake =
        serde_json::from_str(text).map_err(|e| ReceiveError::InvalidHandshake(e.to_string()))?;
    let key = SessionKey::from_hex(&handshake.key).ok_or_else(|| {
        ReceiveError::InvalidHandshake("key must be 64 hex characters".to_string())
    })?;
    Ok((key, handshake.count))
}

/// State of one incoming upload
pub struct ReceiveSession {
    key: SessionKey,
    count: u64,
    received: u64,
    target: PathBuf,
    temp_path: PathBuf,
    file: tokio::fs::File,
}

impl ReceiveSession {
    /// Open the scratch file for a new session
    pub async fn create(
        target: &UploadTarget,
        key: SessionKey,
        count: u64,
    ) -> Result<Self, ReceiveError> {
        let temp_path = target.temp_path();
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
            .map_err(ReceiveError::Storage)?;

        tracing::info!(
            destination = %target.path.display(),
            count,
            "Receiving upload"
        );

        Ok(Self {
            key,
            count,
            received: 0,
            target: target.path.clone(),
            temp_path,
            file,
        })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.count
    }

    /// Check and store one chunk frame. Returns the acknowledgment to send:
    /// `false` means the tag did not match and the same chunk is expected
    /// again.
    pub async fn accept_frame(&mut self, frame: &[u8]) -> Result<bool, ReceiveError> {
        if self.is_complete() {
            return Err(ReceiveError::Protocol(format!(
                "frame received after all {} chunks",
                self.count
            )));
        }

        let Some((tag, data)) = split_frame(frame) else {
            tracing::debug!(index = self.received, len = frame.len(), "Frame shorter than tag");
            return Ok(false);
        };

        if !verify_tag(&self.key, data, tag) {
            tracing::debug!(index = self.received, "Chunk tag mismatch");
            return Ok(false);
        }

        self.file.write_all(data).await.map_err(ReceiveError::Storage)?;
        self.received += 1;

        tracing::trace!(
            index = self.received - 1,
            count = self.count,
            len = data.len(),
            "Chunk stored"
        );
        Ok(true)
    }

    /// Move the completed file over the destination
    pub async fn commit(mut self) -> Result<PathBuf, ReceiveError> {
        if !self.is_complete() {
            let missing = self.count - self.received;
            self.abort().await;
            return Err(ReceiveError::Protocol(format!("{missing} chunks missing")));
        }

        let synced = async {
            self.file.flush().await?;
            self.file.sync_all().await
        }
        .await;
        if let Err(e) = synced {
            self.abort().await;
            return Err(ReceiveError::Commit(e));
        }

        if let Err(e) = tokio::fs::rename(&self.temp_path, &self.target).await {
            self.abort().await;
            return Err(ReceiveError::Commit(e));
        }

        tracing::info!(
            destination = %self.target.display(),
            count = self.count,
            "Upload committed"
        );
        Ok(self.target)
    }

    /// Discard the scratch file
    pub async fn abort(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.temp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.temp_path.display(),
                    error = %e,
                    "Failed to remove partial upload"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receive::paths::resolve_destination;
    use crate::upload::{seal_frame, KEY_LEN, TAG_LEN};
    use tempfile::TempDir;

    fn key() -> SessionKey {
        SessionKey::from_bytes([0x11; KEY_LEN])
    }

    async fn leftovers(dir: &std::path::Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names
    }

    #[test]
    fn test_parse_handshake() {
        let text = format!("{{\"key\":\"{}\",\"count\":4}}", "11".repeat(32));
        let (parsed, count) = parse_handshake(&text).unwrap();
        assert_eq!(parsed, key());
        assert_eq!(count, 4);

        assert!(parse_handshake("true").is_err());
        assert!(parse_handshake("{\"key\":\"abcd\",\"count\":1}").is_err());
        assert!(parse_handshake(&format!("{{\"key\":\"{}\"}}", "11".repeat(32))).is_err());
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(ReceiveError::InvalidHandshake(String::new()).close_code(), 1008);
        assert_eq!(ReceiveError::Protocol(String::new()).close_code(), 1008);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(ReceiveError::Commit(io).close_code(), 1011);
    }

    #[tokio::test]
    async fn test_accepts_valid_and_rejects_corrupt_frames() {
        let root = TempDir::new().unwrap();
        let target = resolve_destination(root.path(), "out.bin").await.unwrap();
        let mut session = ReceiveSession::create(&target, key(), 2).await.unwrap();

        let mut corrupt = seal_frame(&key(), b"first ");
        corrupt[TAG_LEN] ^= 0xff;
        assert!(!session.accept_frame(&corrupt).await.unwrap());
        assert!(!session.accept_frame(&[0u8; 5]).await.unwrap());
        assert_eq!(session.received(), 0);

        assert!(session.accept_frame(&seal_frame(&key(), b"first ")).await.unwrap());
        assert!(session.accept_frame(&seal_frame(&key(), b"second")).await.unwrap());
        assert!(session.is_complete());

        let extra = session.accept_frame(&seal_frame(&key(), b"third")).await;
        assert!(matches!(extra, Err(ReceiveError::Protocol(_))));

        let path = session.commit().await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"first second");
        assert_eq!(leftovers(root.path()).await, vec!["out.bin".to_string()]);
    }

    #[tokio::test]
    async fn test_commit_replaces_existing_file() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("out.bin"), b"old contents").unwrap();
        let target = resolve_destination(root.path(), "out.bin").await.unwrap();

        let mut session = ReceiveSession::create(&target, key(), 1).await.unwrap();
        session.accept_frame(&seal_frame(&key(), b"new")).await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(std::fs::read(root.path().join("out.bin")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_incomplete_commit_and_abort_clean_up() {
        let root = TempDir::new().unwrap();
        let target = resolve_destination(root.path(), "out.bin").await.unwrap();

        let session = ReceiveSession::create(&target, key(), 3).await.unwrap();
        assert!(matches!(session.commit().await, Err(ReceiveError::Protocol(_))));
        assert!(leftovers(root.path()).await.is_empty());

        let mut session = ReceiveSession::create(&target, key(), 3).await.unwrap();
        session.accept_frame(&seal_frame(&key(), b"partial")).await.unwrap();
        session.abort().await;
        assert!(leftovers(root.path()).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_upload_commits_empty_file() {
        let root = TempDir::new().unwrap();
        let target = resolve_destination(root.path(), "empty.bin").await.unwrap();

        let session = ReceiveSession::create(&target, key(), 0).await.unwrap();
        assert!(session.is_complete());
        let path = session.commit().await.unwrap();
        assert!(tokio::fs::read(&path).await.unwrap().is_empty());
    }
}
