use sha2::{Digest, Sha256};
use std::fmt;

/// Stable identifier of one transformation request.
///
/// SHA-256 over the request path and raw query string, so the same request
/// maps to the same key across restarts and across processes sharing a
/// cache directory. The lowercase hex form doubles as the filename stem of
/// every file the cache writes for that request.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Fingerprint a request. An empty path is treated as `/`.
    pub fn fingerprint(path: &str, raw_query: &str) -> Self {
        let path = if path.is_empty() { "/" } else { path };
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        // NUL cannot appear in a request path, so (path, query) splits one way only
        hasher.update([0u8]);
        hasher.update(raw_query.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Leading 64 bits, used to pick a lock stripe.
    pub fn prefix(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(head)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.to_hex())
    }
}
