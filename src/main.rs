use clap::Parser;
use webp_proxy::{config::Cli, server};

/// webp-proxy server entry point.
///
/// Initializes tracing, reads configuration from flags or environment and
/// serves until SIGINT/SIGTERM. Any configuration, startup or shutdown
/// failure is printed on stderr and exits non-zero.
///
/// # Configuration
/// - `--cache-dir` / `CACHE_DIR`: cache directory (required, created if absent)
/// - `--original-url` / `ORIGINAL_URL`: origin base URL (required)
/// - `--port` / `PORT`: listen port (default: 8098)
/// - `RUST_LOG`: logging verbosity (default: "webp_proxy=info,tower_http=info")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webp_proxy=info,tower_http=info".into()),
        )
        .init();

    let cfg = Cli::parse().into_config();
    cfg.validate()?;
    tracing::info!(
        "Starting webp-proxy: cache_dir={}, origin={}, cache_size={}",
        cfg.cache_dir.display(),
        cfg.original_url,
        cfg.cache_size
    );

    server::run(cfg).await?;
    Ok(())
}
