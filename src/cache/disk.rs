use crate::cache::lock::KeyedLock;
use crate::fingerprint::CacheKey;
use crate::{ProxyError, Result};
use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::io::ReaderStream;

/// Extension of every published artifact.
pub const ARTIFACT_EXT: &str = "webp";
pub const ARTIFACT_CONTENT_TYPE: &str = "image/webp";
pub const ARTIFACT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// What `DiskCacheStore::set` did for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// This caller ran the producer and published the entry.
    Produced,
    /// Another caller published the entry while this one waited for the lock.
    Joined,
}

/// Flat on-disk cache of transformed images.
///
/// Layout, all in one directory:
/// - `<key>.webp` published artifacts
/// - `<key>.<pid>.tmp.webp` artifacts being produced
/// - `<key>.<ext>` scratch copies of fetched originals
///
/// Readers hold the key's lock shared while opening; producers hold it
/// exclusively for the whole produce-and-publish step, so at most one
/// producer per key runs in this process. Publishing is a rename, so the
/// artifact path is either absent or complete, including for other
/// processes sharing the directory.
pub struct DiskCacheStore {
    dir: PathBuf,
    locks: KeyedLock,
}

impl DiskCacheStore {
    pub fn new(dir: impl Into<PathBuf>, locks: KeyedLock) -> Self {
        Self { dir: dir.into(), locks }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the cache directory (recursively) if it does not exist yet.
    pub async fn prepare(&self) -> Result<()> {
        match fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(ProxyError::Internal(format!(
                "cache path {} is not a directory",
                self.dir.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.dir).await?;
                tracing::info!("Created cache directory {}", self.dir.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key, ARTIFACT_EXT))
    }

    fn staging_path(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}.{}.tmp.{}", key, std::process::id(), ARTIFACT_EXT))
    }

    /// Scratch location for the original asset behind `key`.
    ///
    /// Keeps the asset's extension so the transcoder can sniff the input.
    /// An asset without a usable extension, or one ending in the artifact
    /// extension, gets an `.orig` infix so it never lands on the artifact path.
    pub fn scratch_path(&self, key: &CacheKey, asset: &str) -> PathBuf {
        let ext = Path::new(asset)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()));
        let name = match ext {
            Some(ext) if !ext.eq_ignore_ascii_case(ARTIFACT_EXT) => format!("{}.{}", key, ext),
            Some(ext) => format!("{}.orig.{}", key, ext),
            None => format!("{}.orig", key),
        };
        self.dir.join(name)
    }

    /// Open the published artifact for `key`.
    ///
    /// The lock is released before returning; the open handle stays valid
    /// even if the entry is replaced afterwards. Any failure to stat or open
    /// is reported as `NotFound`.
    pub async fn get(&self, key: &CacheKey) -> Result<CachedArtifact> {
        let path = self.entry_path(key);
        let _guard = self.locks.read(key).await;

        let file = fs::File::open(&path)
            .await
            .map_err(|e| ProxyError::NotFound(format!("{}: {}", path.display(), e)))?;
        let meta = file
            .metadata()
            .await
            .map_err(|e| ProxyError::NotFound(format!("{}: {}", path.display(), e)))?;
        if !meta.is_file() {
            return Err(ProxyError::NotFound(format!("{} is not a file", path.display())));
        }

        Ok(CachedArtifact { key: *key, file, len: meta.len() })
    }

    /// Produce and publish the artifact for `key` unless it already exists.
    ///
    /// `produce` receives a staging path in the cache directory and must
    /// leave a complete artifact there on success. The store renames it onto
    /// the entry path. On failure the staging file is removed and the error
    /// is returned unchanged; nothing is published.
    pub async fn set<F, Fut>(&self, key: &CacheKey, produce: F) -> Result<SetOutcome>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let _guard = self.locks.write(key).await;
        let dest = self.entry_path(key);

        if is_file(&dest).await {
            tracing::debug!("Entry {} published while waiting, joining", key);
            return Ok(SetOutcome::Joined);
        }

        let staging = self.staging_path(key);
        if let Err(e) = produce(staging.clone()).await {
            discard(&staging).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&staging, &dest).await {
            discard(&staging).await;
            return Err(e.into());
        }

        tracing::debug!("Published {}", dest.display());
        Ok(SetOutcome::Produced)
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Open handle on a published artifact.
#[derive(Debug)]
pub struct CachedArtifact {
    key: CacheKey,
    file: fs::File,
    len: u64,
}

impl CachedArtifact {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn etag(&self) -> String {
        format!("\"{}\"", self.key)
    }
}

impl IntoResponse for CachedArtifact {
    fn into_response(self) -> Response {
        let etag = self.etag();
        let mut response = Body::from_stream(ReaderStream::new(self.file)).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(ARTIFACT_CONTENT_TYPE));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.len));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(ARTIFACT_CACHE_CONTROL));
        if let Ok(value) = HeaderValue::from_str(&etag) {
            headers.insert(header::ETAG, value);
        }
        response
    }
}
