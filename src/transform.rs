use crate::{ProxyError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

pub mod params;

pub use params::TransformParams;

/// One invocation of the transcoder.
#[derive(Debug, Clone, Copy)]
pub struct TranscodeJob<'a> {
    pub src: &'a Path,
    pub dest: &'a Path,
    pub width: u32,
    pub height: u32,
    pub quality: f32,
}

/// Turns a source image file into a WebP file.
#[async_trait::async_trait]
pub trait Transcoder: Send + Sync {
    /// Must leave a complete WebP at `job.dest` on success. The source file
    /// is never removed.
    async fn transcode(&self, job: &TranscodeJob<'_>) -> Result<()>;
}

/// `cwebp` run as a subprocess with a hard deadline.
///
/// Invoked as `cwebp -quiet -q <q> -resize <w> <h> <src> -o <dest>`. A
/// non-zero exit or a missed deadline is a `Transform` error carrying the
/// tool's combined output; on timeout the child is killed.
#[derive(Debug, Clone)]
pub struct Cwebp {
    bin: PathBuf,
    timeout: Duration,
}

impl Cwebp {
    pub fn new(bin: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { bin: bin.into(), timeout }
    }

    fn command(&self, job: &TranscodeJob<'_>) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-quiet")
            .arg("-q")
            .arg(job.quality.to_string())
            .arg("-resize")
            .arg(job.width.to_string())
            .arg(job.height.to_string())
            .arg(job.src)
            .arg("-o")
            .arg(job.dest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl Transcoder for Cwebp {
    async fn transcode(&self, job: &TranscodeJob<'_>) -> Result<()> {
        let tool = self.bin.display();
        tracing::debug!(
            "Running {} on {} ({}x{}, q={})",
            tool,
            job.src.display(),
            job.width,
            job.height,
            job.quality
        );

        let mut child = self
            .command(job)
            .spawn()
            .map_err(|e| ProxyError::Transform(format!("failed to execute {}: {}", tool, e)))?;

        // Drain both pipes while waiting so a chatty tool cannot block on a full pipe.
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let run = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (status, _, _) = tokio::join!(
                child.wait(),
                read_all(stdout.as_mut(), &mut out),
                read_all(stderr.as_mut(), &mut err)
            );
            out.extend_from_slice(&err);
            (status, out)
        };

        let (status, output) = match tokio::time::timeout(self.timeout, run).await {
            Ok(done) => done,
            Err(_) => {
                return Err(ProxyError::Transform(format!(
                    "{} timed out after {:?}",
                    tool, self.timeout
                )))
            }
        };

        let status = status
            .map_err(|e| ProxyError::Transform(format!("failed to wait for {}: {}", tool, e)))?;
        if !status.success() {
            return Err(ProxyError::Transform(format!(
                "failed to execute {} ({}): {}",
                tool,
                String::from_utf8_lossy(&output).trim(),
                status
            )));
        }
        Ok(())
    }
}

async fn read_all<R: tokio::io::AsyncRead + Unpin>(pipe: Option<&mut R>, buf: &mut Vec<u8>) {
    if let Some(pipe) = pipe {
        let _ = pipe.read_to_end(buf).await;
    }
}

/// Check that `path` holds a WebP image, judged by its magic bytes.
pub async fn verify_webp(path: &Path) -> Result<()> {
    let mut head = [0u8; 16];
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ProxyError::Transform(format!("no output at {}: {}", path.display(), e)))?;
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    match image::guess_format(&head[..filled]) {
        Ok(image::ImageFormat::WebP) => Ok(()),
        Ok(other) => Err(ProxyError::Transform(format!("output is {:?}, not WebP", other))),
        Err(_) => Err(ProxyError::Transform(format!(
            "output is not a recognisable image ({} bytes)",
            filled
        ))),
    }
}
