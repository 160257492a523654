use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8098;
pub const DEFAULT_CACHE_SIZE: usize = 128;
pub const DEFAULT_QUALITY: f32 = 75.0;
pub const DEFAULT_TRANSCODER: &str = "cwebp";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_INPUT_SIZE: u64 = 8 * 1024 * 1024;

/// Immutable proxy configuration, handed to each component at construction.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub cache_dir: PathBuf,
    /// Capacity hint. Sizes the lock table; nothing is evicted.
    pub cache_size: usize,
    /// Origin base URL. Only scheme, host and port are used.
    pub original_url: String,
    pub allowed_origins: Vec<String>,
    pub transcoder: PathBuf,
    pub fetch_timeout: Duration,
    pub transform_timeout: Duration,
    pub shutdown_grace: Duration,
    pub max_input_size: u64, // bytes
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cache_dir: PathBuf::new(),
            cache_size: DEFAULT_CACHE_SIZE,
            original_url: String::new(),
            allowed_origins: Vec::new(),
            transcoder: PathBuf::from(DEFAULT_TRANSCODER),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            transform_timeout: DEFAULT_TRANSFORM_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("flag `--cache-dir` is empty")]
    EmptyCacheDir,
    #[error("flag `--original-url` is empty")]
    EmptyOriginalUrl,
    #[error("invalid `--original-url` {0:?}: {1}")]
    InvalidOriginalUrl(String, String),
    #[error("`--original-url` must be http or https, got {0:?}")]
    UnsupportedScheme(String),
    #[error("max input size must be > 0")]
    InvalidMaxInput,
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyCacheDir);
        }
        self.origin()?;
        if self.max_input_size == 0 {
            return Err(ConfigError::InvalidMaxInput);
        }
        Ok(())
    }

    /// Parsed origin base URL.
    pub fn origin(&self) -> Result<Url, ConfigError> {
        let raw = self.original_url.trim();
        if raw.is_empty() {
            return Err(ConfigError::EmptyOriginalUrl);
        }
        let url = Url::parse(raw)
            .map_err(|e| ConfigError::InvalidOriginalUrl(raw.to_string(), e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidOriginalUrl(raw.to_string(), "missing host".into()));
        }
        Ok(url)
    }
}

/// Command-line flags, each also readable from the environment.
#[derive(Debug, Parser)]
#[command(name = "webp-proxy", version, about = "Caching WebP transformation proxy")]
pub struct Cli {
    /// Server port
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory for cached artifacts and scratch files
    #[arg(long, env = "CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Number of images to cache (capacity hint)
    #[arg(long, env = "CACHE_SIZE", default_value_t = DEFAULT_CACHE_SIZE)]
    pub cache_size: usize,

    /// URL of the origin serving original images
    #[arg(long, env = "ORIGINAL_URL")]
    pub original_url: Option<String>,

    /// Comma-separated list of domains allowed by CORS
    #[arg(long, env = "CORS", value_delimiter = ',')]
    pub cors: Vec<String>,

    /// Path to the cwebp binary
    #[arg(long, env = "CWEBP_BIN", default_value = DEFAULT_TRANSCODER)]
    pub cwebp: PathBuf,

    #[arg(long, env = "FETCH_TIMEOUT_MS", default_value_t = DEFAULT_FETCH_TIMEOUT.as_millis() as u64)]
    pub fetch_timeout_ms: u64,

    #[arg(long, env = "TRANSFORM_TIMEOUT_MS", default_value_t = DEFAULT_TRANSFORM_TIMEOUT.as_millis() as u64)]
    pub transform_timeout_ms: u64,

    /// Largest original accepted from the origin, in bytes
    #[arg(long, env = "MAX_INPUT_SIZE", default_value_t = DEFAULT_MAX_INPUT_SIZE)]
    pub max_input_size: u64,
}

impl Cli {
    pub fn into_config(self) -> ProxyConfig {
        ProxyConfig {
            port: self.port,
            cache_dir: self.cache_dir.unwrap_or_default(),
            cache_size: self.cache_size,
            original_url: self.original_url.unwrap_or_default(),
            allowed_origins: self
                .cors
                .into_iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            transcoder: self.cwebp,
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            transform_timeout: Duration::from_millis(self.transform_timeout_ms),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            max_input_size: self.max_input_size,
        }
    }
}
