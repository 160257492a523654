use crate::config::{ConfigError, ProxyConfig};
use crate::pipeline::Pipeline;
use crate::{router, ProxyError};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("startup failed: {0}")]
    Setup(#[from] ProxyError),
    #[error("server failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("server task failed: {0}")]
    Task(#[from] JoinError),
    #[error("in-flight requests still running after {0:?} grace period")]
    ShutdownTimeout(Duration),
}

/// Validate `cfg`, prepare the cache directory and build the router.
pub async fn build(cfg: &ProxyConfig) -> Result<Router, ServeError> {
    cfg.validate()?;
    let pipeline = Pipeline::from_config(cfg)?;
    pipeline.store().prepare().await?;
    Ok(router(Arc::new(pipeline), &cfg.allowed_origins))
}

/// Run the proxy until SIGINT/SIGTERM, then drain.
pub async fn run(cfg: ProxyConfig) -> Result<(), ServeError> {
    let app = build(&cfg).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listened on {}", addr);
    serve_until(listener, app, shutdown_signal(), cfg.shutdown_grace).await
}

/// Serve `app` until `shutdown` resolves.
///
/// After that the listener stops accepting and in-flight requests get
/// `grace` to finish; overrunning it aborts the server and is an error.
pub async fn serve_until<F>(
    listener: TcpListener,
    app: Router,
    shutdown: F,
    grace: Duration,
) -> Result<(), ServeError>
where
    F: Future<Output = ()>,
{
    let drain = CancellationToken::new();
    let stop = drain.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
    });

    tokio::select! {
        joined = &mut server => return Ok(joined??),
        _ = shutdown => {}
    }

    tracing::info!("terminating ...");
    drain.cancel();
    match tokio::time::timeout(grace, &mut server).await {
        Ok(joined) => Ok(joined??),
        Err(_) => {
            server.abort();
            Err(ServeError::ShutdownTimeout(grace))
        }
    }
}

/// Resolves on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Failed to register signal handlers: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
