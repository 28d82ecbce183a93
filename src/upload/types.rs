//! Wire types and errors for the chunked upload protocol

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest accepted chunk size: 64 MiB. The receiver sizes its WebSocket
/// frame limit from this, so larger chunks could never be delivered.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Session key length in bytes
pub const KEY_LEN: usize = 32;

/// Integrity tag length in bytes (prefix of every chunk frame)
pub const TAG_LEN: usize = 32;

/// WebSocket close codes used by the protocol
pub mod close_code {
    /// Upload completed and the file was committed
    pub const NORMAL: u16 = 1000;
    /// Close frame carried no status code
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame
    pub const ABNORMAL: u16 = 1006;
    /// Malformed handshake or frame stream
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Server failed to commit the upload
    pub const INTERNAL_ERROR: u16 = 1011;
}

// ============================================================================
// Handshake / Acknowledgment
// ============================================================================

/// Control message sent once, before any chunk frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Session key as 64 lowercase hex characters
    pub key: String,

    /// Number of chunk frames that will follow
    pub count: u64,
}

/// Decode an inbound acknowledgment (a bare JSON boolean)
pub fn parse_ack(text: &str) -> Result<bool, UploadError> {
    serde_json::from_str::<bool>(text).map_err(|e| {
        UploadError::Protocol(format!("expected boolean acknowledgment, got {text:?}: {e}"))
    })
}

/// Encode an acknowledgment
pub fn encode_ack(accepted: bool) -> String {
    if accepted { "true" } else { "false" }.to_string()
}

// ============================================================================
// Destination
// ============================================================================

/// Destination of an upload, as ordered path segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPath {
    segments: Vec<String>,
}

impl DestinationPath {
    /// Build from segments. Empty segments are dropped.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(Into::into)
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Split a `/`-separated path into segments
    pub fn parse(path: &str) -> Self {
        Self::new(path.split('/'))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// URL path form: each segment percent-encoded, joined with `/`
    pub fn to_url_path(&self) -> String {
        self.segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl std::fmt::Display for DestinationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Terminal failure of an upload session
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to open upload connection: {0}")]
    TransportEstablishment(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed with code {code} after {accepted}/{count} chunks")]
    AbnormalClose { code: u16, accepted: u64, count: u64 },

    #[error("Server rejected the session handshake")]
    HandshakeRejected,

    #[error("Chunk {index} rejected {rejections} times in a row")]
    TooManyRejections { index: u64, rejections: u32 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to read source: {0}")]
    Source(#[from] std::io::Error),

    #[error("Failed to encode handshake: {0}")]
    Encode(#[from] serde_json::Error),
}

impl UploadError {
    /// Close code carried by this failure, if any
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::AbnormalClose { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_json_shape() {
        let msg = Handshake { key: "ab".repeat(32), count: 3 };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, format!("{{\"key\":\"{}\",\"count\":3}}", "ab".repeat(32)));
    }

    #[test]
    fn test_parse_ack() {
        assert!(parse_ack("true").unwrap());
        assert!(!parse_ack(" false ").unwrap());
        assert!(matches!(parse_ack("1"), Err(UploadError::Protocol(_))));
        assert!(matches!(parse_ack("{\"ok\":true}"), Err(UploadError::Protocol(_))));
    }

    #[test]
    fn test_destination_path() {
        let dest = DestinationPath::parse("/docs//big file.bin");
        assert_eq!(dest.segments(), ["docs", "big file.bin"]);
        assert_eq!(dest.to_string(), "docs/big file.bin");
        assert_eq!(dest.to_url_path(), "docs/big%20file.bin");
        assert!(DestinationPath::parse("//").is_empty());
    }

    #[test]
    fn test_close_code_accessor() {
        let err = UploadError::AbnormalClose { code: 1008, accepted: 0, count: 3 };
        assert_eq!(err.close_code(), Some(1008));
        assert_eq!(UploadError::Transport("reset".into()).close_code(), None);
    }
}
