use crate::cache::{CachedArtifact, DiskCacheStore, KeyedLock, SetOutcome};
use crate::config::ProxyConfig;
use crate::fetch::{HttpOrigin, Origin};
use crate::fingerprint::CacheKey;
use crate::metrics::Metrics;
use crate::transform::{verify_webp, Cwebp, TranscodeJob, Transcoder, TransformParams};
use crate::{ProxyError, Result};
use std::sync::Arc;

/// Fetch-transform-serve pipeline behind the HTTP handler.
///
/// Per request: fingerprint, look the key up, and on a miss fetch the
/// original, transcode it and publish the artifact under the key's
/// exclusive lock, then serve the published file. Concurrent misses for one
/// key share a single fetch and transcode.
pub struct Pipeline {
    store: DiskCacheStore,
    origin: Arc<dyn Origin>,
    transcoder: Arc<dyn Transcoder>,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        store: DiskCacheStore,
        origin: Arc<dyn Origin>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self { store, origin, transcoder, metrics: Arc::new(Metrics::new()) }
    }

    /// Pipeline wired to the HTTP origin and `cwebp` named in `cfg`.
    pub fn from_config(cfg: &ProxyConfig) -> Result<Self> {
        let base = cfg.origin().map_err(|e| ProxyError::Internal(e.to_string()))?;
        let store = DiskCacheStore::new(&cfg.cache_dir, KeyedLock::for_capacity(cfg.cache_size));
        let origin = HttpOrigin::new(base, cfg.fetch_timeout, cfg.max_input_size)?;
        let transcoder = Cwebp::new(&cfg.transcoder, cfg.transform_timeout);
        Ok(Self::new(store, Arc::new(origin), Arc::new(transcoder)))
    }

    pub fn store(&self) -> &DiskCacheStore {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Serve the artifact for a request with `path` and raw `query`.
    pub async fn handle(&self, path: &str, query: Option<&str>) -> Result<CachedArtifact> {
        let result = self.run(path, query.unwrap_or("")).await;
        if result.is_err() {
            Metrics::incr(&self.metrics.errors);
        }
        result
    }

    async fn run(&self, path: &str, query: &str) -> Result<CachedArtifact> {
        let key = CacheKey::fingerprint(path, query);

        // Any lookup failure just means we produce the entry
        match self.store.get(&key).await {
            Ok(artifact) => {
                tracing::debug!("Cache hit for key={}", key);
                Metrics::incr(&self.metrics.cache_hits);
                return Ok(artifact);
            }
            Err(e) => tracing::debug!("Cache miss for key={}: {}", key, e),
        }
        Metrics::incr(&self.metrics.cache_misses);

        let params: TransformParams = query.parse()?;
        let params = &params;
        let scratch = self.store.scratch_path(&key, &params.source);
        tracing::info!(
            "Producing key={} from {} ({}x{}, q={})",
            key,
            params.source,
            params.width,
            params.height,
            params.quality
        );

        let outcome = self
            .store
            .set(&key, |staging| async move {
                self.origin.fetch(&params.source, &scratch).await?;
                let job = TranscodeJob {
                    src: &scratch,
                    dest: &staging,
                    width: params.width,
                    height: params.height,
                    quality: params.quality,
                };
                self.transcoder.transcode(&job).await?;
                verify_webp(&staging).await
            })
            .await?;

        match outcome {
            SetOutcome::Produced => Metrics::incr(&self.metrics.transforms),
            SetOutcome::Joined => {
                tracing::debug!("Joined in-flight production for key={}", key);
                Metrics::incr(&self.metrics.joined);
            }
        }

        self.store.get(&key).await.map_err(|e| {
            ProxyError::Internal(format!("cache entry {} unreadable after write: {}", key, e))
        })
    }
}
