//! Chunk integrity
//!
//! Every chunk frame is `tag || bytes`, where `tag` is a 32-byte keyed
//! BLAKE2b digest of `bytes` under the session key.

use blake2::digest::{consts::U32, Mac};
use blake2::Blake2bMac;

use super::key::SessionKey;
use super::types::TAG_LEN;

type Blake2bMac256 = Blake2bMac<U32>;

/// Keyed digest of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityTag([u8; TAG_LEN]);

impl IntegrityTag {
    pub fn as_bytes(&self) -> &[u8; TAG_LEN] {
        &self.0
    }
}

fn keyed(key: &SessionKey) -> Blake2bMac256 {
    // 32-byte keys are always within BLAKE2b's 64-byte limit
    <Blake2bMac256 as Mac>::new_from_slice(key.as_bytes())
        .unwrap_or_else(|_| unreachable!("session key exceeds BLAKE2b key size"))
}

/// Compute the tag of a chunk
pub fn compute_tag(key: &SessionKey, data: &[u8]) -> IntegrityTag {
    let mut mac = keyed(key);
    mac.update(data);
    IntegrityTag(mac.finalize().into_bytes().into())
}

/// Verify a received tag in constant time
pub fn verify_tag(key: &SessionKey, data: &[u8], tag: &[u8]) -> bool {
    let mut mac = keyed(key);
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}

/// Build the outbound frame for a chunk
pub fn seal_frame(key: &SessionKey, data: &[u8]) -> Vec<u8> {
    let tag = compute_tag(key, data);
    let mut frame = Vec::with_capacity(TAG_LEN + data.len());
    frame.extend_from_slice(tag.as_bytes());
    frame.extend_from_slice(data);
    frame
}

/// Split a frame into `(tag, data)`. `None` if it is shorter than a tag.
pub fn split_frame(frame: &[u8]) -> Option<(&[u8], &[u8])> {
    if frame.len() < TAG_LEN {
        return None;
    }
    Some(frame.split_at(TAG_LEN))
}
