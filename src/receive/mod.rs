//! Receiving side of the chunked upload protocol
//!
//! - `paths`: validates destinations under the served root
//! - `registry`: one upload per destination, bounded concurrency
//! - `session`: tag verification, scratch file, atomic commit

pub mod paths;
pub mod registry;
pub mod session;

pub use paths::{resolve_destination, UploadTarget};
pub use registry::{UploadClaim, UploadRegistry};
pub use session::{parse_handshake, ReceiveError, ReceiveSession};
