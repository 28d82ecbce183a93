//! Chunked Upload Module
//!
//! Pushes one object to a remote path over a WebSocket, one verified chunk
//! at a time.
//!
//! Protocol Flow:
//! 1. Client opens `/upload/<path>` and sends `{"key": <hex>, "count": N}`
//! 2. Server answers `true`; this acknowledges the handshake itself
//! 3. Client sends chunk 0 as `tag || bytes` (tag = keyed BLAKE2b-256)
//! 4. Server answers `true` (advance) or `false` (resend the same chunk)
//! 5. After the last `true`, server closes with 1000 once the file is
//!    committed; any other close code is a failure

pub mod integrity;
pub mod key;
pub mod session;
pub mod source;
pub mod transport;
pub mod types;
pub mod uploader;

pub use integrity::{compute_tag, seal_frame, split_frame, verify_tag, IntegrityTag};
pub use key::{FixedKeyProvider, KeyProvider, OsKeyProvider, SessionKey};
pub use session::{Action, SessionState, Step, UploadSession};
pub use source::{ChunkPlan, ChunkSource, FileSource};
pub use transport::{ScriptedTransport, Transport, TransportEvent, WebSocketTransport};
pub use types::*;
pub use uploader::{UploadConfig, Uploader};
