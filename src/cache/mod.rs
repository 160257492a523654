pub mod disk;
pub mod lock;

pub use disk::{CachedArtifact, DiskCacheStore, SetOutcome, ARTIFACT_CONTENT_TYPE, ARTIFACT_EXT};
pub use lock::KeyedLock;
