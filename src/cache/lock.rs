use crate::fingerprint::CacheKey;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const MIN_STRIPES: usize = 256;
pub const MAX_STRIPES: usize = 4096;

/// Per-key reader/writer locks.
///
/// A fixed table of stripes indexed by the key's leading bits, so every key
/// has exactly one lock for the life of the process and the table never
/// grows. Distinct keys sharing a stripe contend with each other.
///
/// A producer holds its stripe exclusively for the whole fetch and
/// transcode, which is bounded by the fetch timeout plus the transform
/// timeout (8 s with the defaults). For that long, hits for other keys on
/// the same stripe wait too. With at least `MIN_STRIPES` stripes a given
/// miss stalls roughly `1 / stripes` of the unrelated traffic.
pub struct KeyedLock {
    stripes: Box<[RwLock<()>]>,
}

impl KeyedLock {
    /// Sizes the table from a cache capacity hint.
    pub fn for_capacity(capacity: usize) -> Self {
        Self::with_stripes(capacity.clamp(MIN_STRIPES, MAX_STRIPES).next_power_of_two())
    }

    pub fn with_stripes(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| RwLock::new(())).collect(),
        }
    }

    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }

    fn stripe(&self, key: &CacheKey) -> &RwLock<()> {
        let idx = (key.prefix() % self.stripes.len() as u64) as usize;
        &self.stripes[idx]
    }

    /// Shared acquisition, for reading an entry.
    pub async fn read(&self, key: &CacheKey) -> RwLockReadGuard<'_, ()> {
        self.stripe(key).read().await
    }

    /// Exclusive acquisition, for producing an entry.
    pub async fn write(&self, key: &CacheKey) -> RwLockWriteGuard<'_, ()> {
        self.stripe(key).write().await
    }
}
