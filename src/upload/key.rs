//! Session keys and the random source that produces them

use rand::RngCore;

use super::types::KEY_LEN;

/// Per-session secret keying the chunk integrity tags
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode from the handshake's hex form. Returns `None` unless the
    /// input is exactly `KEY_LEN` bytes of hex.
    pub fn from_hex(text: &str) -> Option<Self> {
        let bytes = hex::decode(text).ok()?;
        let bytes: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Source of fresh session keys
pub trait KeyProvider: Send + Sync {
    fn generate(&self) -> SessionKey;
}

/// Keys from the operating system CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsKeyProvider;

impl KeyProvider for OsKeyProvider {
    fn generate(&self) -> SessionKey {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        SessionKey(bytes)
    }
}

/// Always hands out the same key. Lets tests assert exact tags.
#[derive(Debug, Clone)]
pub struct FixedKeyProvider(pub SessionKey);

impl KeyProvider for FixedKeyProvider {
    fn generate(&self) -> SessionKey {
        self.0.clone()
    }
}
