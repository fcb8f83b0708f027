// Hardened HTTP listener for the liveness router: bounded header reads and
// sizes, per-request and per-connection time limits, graceful drain on cancel.

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info, warn};

/// hyper rejects read buffers smaller than this.
const MIN_BUF_SIZE: usize = 8192;
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ServerTimeouts {
    /// Reading the rest of a request once headers are in.
    pub read: Duration,
    pub read_header: Duration,
    /// Producing the response.
    pub write: Duration,
    /// Extra time a connection may linger between requests.
    pub idle: Duration,
    pub max_header_bytes: usize,
    /// Bound on draining open connections after cancellation.
    pub shutdown: Duration,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(5),
            read_header: Duration::from_secs(2),
            write: Duration::from_secs(5),
            idle: Duration::from_secs(5),
            max_header_bytes: MIN_BUF_SIZE,
            shutdown: Duration::from_secs(60),
        }
    }
}

impl ServerTimeouts {
    /// Lifetime after which a connection is asked to close once its current
    /// response is done.
    fn connection_budget(&self) -> Duration {
        self.read_header + self.read + self.write + self.idle
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("failed to accept connections: {0}")]
    Accept(io::Error),
    #[error("server shutdown error: connections still open after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Binds `addr` and serves until `cancel` fires. A bind failure cancels `cancel`
/// so the rest of the process unwinds.
pub async fn listen_and_serve(
    addr: SocketAddr,
    router: Router,
    timeouts: &ServerTimeouts,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(source) => {
            cancel.cancel();
            return Err(ServerError::Bind { addr, source });
        }
    };
    serve(listener, router, timeouts, cancel).await
}

/// Serves on an already-bound listener until `cancel` fires, then stops
/// accepting and waits up to `timeouts.shutdown` for open connections.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    timeouts: &ServerTimeouts,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }

    let service = TowerToHyperService::new(router.layer(TimeoutLayer::new(timeouts.write)));
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.read_header)
        .max_buf_size(timeouts.max_header_bytes.max(MIN_BUF_SIZE));
    let budget = timeouts.connection_budget();
    let grace = timeouts.write;
    let connections = TaskTracker::new();
    let mut failure = None;

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) if is_transient_accept_error(&e) => {
                    warn!(error = %e, operation = "accept", "accept failed, retrying");
                    tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                    continue;
                }
                Err(e) => {
                    error!(error = %e, operation = "accept", "listener failed");
                    cancel.cancel();
                    failure = Some(ServerError::Accept(e));
                    break;
                }
            },
        };

        let conn = builder
            .serve_connection_with_upgrades(TokioIo::new(stream), service.clone())
            .into_owned();
        let cancel = cancel.clone();
        connections.spawn(async move {
            let mut conn = std::pin::pin!(conn);
            tokio::select! {
                res = conn.as_mut() => return log_connection(peer, res),
                _ = tokio::time::sleep(budget) => debug!(%peer, "connection budget used up, closing"),
                _ = cancel.cancelled() => {}
            }
            // Lets the in-flight response finish, then closes.
            conn.as_mut().graceful_shutdown();
            match tokio::time::timeout(grace, conn).await {
                Ok(res) => log_connection(peer, res),
                Err(_) => debug!(%peer, "connection did not close in time, dropping"),
            }
        });
    }

    drop(listener);
    connections.close();
    info!("Server draining connections");
    let drained = tokio::time::timeout(timeouts.shutdown, connections.wait()).await;
    if let Some(e) = failure {
        return Err(e);
    }
    match drained {
        Ok(()) => {
            info!("Server shutdown complete");
            Ok(())
        }
        Err(_) => Err(ServerError::ShutdownTimeout(timeouts.shutdown)),
    }
}

fn log_connection<E: std::fmt::Display>(peer: SocketAddr, res: Result<(), E>) {
    if let Err(e) = res {
        debug!(%peer, error = %e, "connection error");
    }
}

/// Errors that concern one incoming connection or a momentary resource
/// shortage; anything else means the listener itself is broken.
fn is_transient_accept_error(e: &io::Error) -> bool {
    use io::ErrorKind::*;
    // EMFILE / ENFILE: out of file descriptors, may clear as connections close.
    matches!(
        e.kind(),
        ConnectionRefused | ConnectionAborted | ConnectionReset | Interrupted | WouldBlock | TimedOut
    ) || matches!(e.raw_os_error(), Some(23 | 24))
}
