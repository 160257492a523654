use crate::{ProxyError, Result};
use futures::StreamExt;
use reqwest::{Client, Url};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Source of original images.
#[async_trait::async_trait]
pub trait Origin: Send + Sync {
    /// Download `asset` into `scratch`, replacing whatever is there.
    async fn fetch(&self, asset: &str, scratch: &Path) -> Result<()>;
}

/// Fetches originals over HTTP from a single configured origin.
///
/// The upstream URL is the origin's scheme, host and port joined with the
/// requested asset path; the caller's query string is never forwarded.
/// Every request (body included) is bounded by the client timeout.
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    client: Client,
    base: Url,
    max_size: u64,
}

impl HttpOrigin {
    pub fn new(base: Url, timeout: Duration, max_size: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base, max_size })
    }

    /// Upstream URL for `asset`.
    pub fn upstream_url(&self, asset: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(asset);
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    async fn download(&self, url: &Url, scratch: &Path) -> Result<u64> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ProxyError::Fetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProxyError::UpstreamStatus(resp.status().as_u16()));
        }

        // Pre-flight size check based on Content-Length header
        if let Some(len) = resp.content_length() {
            if len > self.max_size {
                return Err(too_large(self.max_size));
            }
        }

        let mut file = fs::File::create(scratch).await?;
        let mut written = 0u64;
        let mut stream = resp.bytes_stream();

        // Streaming enforcement as well, Content-Length may be absent or wrong
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProxyError::Fetch(e.to_string()))?;
            written += chunk.len() as u64;
            if written > self.max_size {
                return Err(too_large(self.max_size));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }
}

fn too_large(max: u64) -> ProxyError {
    ProxyError::ClientInput(format!("original exceeds the {} byte size limit", max))
}

#[async_trait::async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, asset: &str, scratch: &Path) -> Result<()> {
        let url = self.upstream_url(asset);
        tracing::debug!("Fetching {}", url);

        match self.download(&url, scratch).await {
            Ok(bytes) => {
                tracing::debug!("Fetched {} ({} bytes) into {}", url, bytes, scratch.display());
                Ok(())
            }
            Err(e) => {
                // Don't leave a truncated original behind
                let _ = fs::remove_file(scratch).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;

    const LIMIT: u64 = 1024;

    fn origin(base: &str) -> HttpOrigin {
        HttpOrigin::new(Url::parse(base).unwrap(), Duration::from_secs(1), LIMIT).unwrap()
    }

    /// Local origin with one sized body, one chunked body and one small body.
    async fn spawn_origin() -> String {
        let app = Router::new()
            .route("/big.jpg", get(|| async { vec![0u8; 4 * LIMIT as usize] }))
            .route(
                "/chunked.jpg",
                get(|| async {
                    let chunks = (0..8).map(|_| Ok::<_, std::io::Error>(vec![0u8; 512]));
                    Body::from_stream(futures::stream::iter(chunks))
                }),
            )
            .route("/small.jpg", get(|| async { vec![7u8; 100] }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn upstream_url_uses_origin_host_and_asset_path() {
        let o = origin("https://img.example.com:8443/ignored/base?token=1");
        assert_eq!(
            o.upstream_url("/photos/cat.jpg").as_str(),
            "https://img.example.com:8443/photos/cat.jpg"
        );
    }

    #[test]
    fn upstream_url_drops_query_and_adds_leading_slash() {
        let o = origin("http://origin.local");
        assert_eq!(o.upstream_url("cat.jpg").as_str(), "http://origin.local/cat.jpg");
        // `?` in the asset is path data, never a forwarded query
        let url = o.upstream_url("/cat.jpg?w=1");
        assert_eq!(url.query(), None);
        assert_eq!(url.path(), "/cat.jpg%3Fw=1");
    }

    #[tokio::test]
    async fn unreachable_origin_is_fetch_error() {
        // Port 9 (discard) on localhost is closed in practice
        let o = origin("http://127.0.0.1:9");
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("x.jpg");
        let err = o.fetch("/x.jpg", &scratch).await.unwrap_err();
        assert!(matches!(err, ProxyError::Fetch(_)), "{err:?}");
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn oversized_content_length_is_rejected() {
        let o = origin(&spawn_origin().await);
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("big.jpg");
        let err = o.fetch("/big.jpg", &scratch).await.unwrap_err();
        assert!(matches!(err, ProxyError::ClientInput(_)), "{err:?}");
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn oversized_chunked_body_is_rejected_while_streaming() {
        let o = origin(&spawn_origin().await);
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("chunked.jpg");
        // A previous original under the same name must not survive either
        std::fs::write(&scratch, b"stale").unwrap();
        let err = o.fetch("/chunked.jpg", &scratch).await.unwrap_err();
        assert!(matches!(err, ProxyError::ClientInput(_)), "{err:?}");
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn body_within_limit_lands_in_scratch() {
        let o = origin(&spawn_origin().await);
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("small.jpg");
        o.fetch("/small.jpg", &scratch).await.unwrap();
        assert_eq!(std::fs::read(&scratch).unwrap(), vec![7u8; 100]);
    }
}
