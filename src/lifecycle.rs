// Lifecycle coordinator: runs the watcher, the poster and the liveness server
// under one cancellation token and reports the first fatal error.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::health::{HealthCheck, HealthRegistry};
use crate::poster::Poster;
use crate::routes;
use crate::server::{self, ServerError, ServerTimeouts};
use crate::source::ResourceSource;
use crate::watcher::Watcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Stopped => "stopped",
        })
    }
}

/// Process exit status per failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Ok = 0,
    ConfigError = 1,
    ClientError = 2,
    ServerError = 3,
    TaskFailed = 4,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status as u8)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("{task} task failed: {source}")]
    Task {
        task: &'static str,
        source: tokio::task::JoinError,
    },
    #[error("{task} task exited before shutdown")]
    TaskExited { task: &'static str },
}

impl LifecycleError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            LifecycleError::Server(_) => ExitStatus::ServerError,
            LifecycleError::Task { .. } | LifecycleError::TaskExited { .. } => {
                ExitStatus::TaskFailed
            }
        }
    }
}

/// The wired-up service: a watcher feeding a poster, both reporting health.
pub struct Pipeline<S> {
    watcher: Arc<Watcher<S>>,
    poster: Arc<Poster<Watcher<S>>>,
    resync_interval: Duration,
    listen_addr: SocketAddr,
    timeouts: ServerTimeouts,
}

impl<S: ResourceSource> Pipeline<S> {
    pub fn new(source: S, client: reqwest::Client, config: &AppConfig) -> anyhow::Result<Self> {
        let watcher = Arc::new(Watcher::new(source, config.watcher.end_policy()));
        let poster = Arc::new(Poster::new(
            watcher.clone(),
            client,
            config.poster.endpoint_url.clone(),
            config.poster.send_interval(),
        ));
        Ok(Self {
            watcher,
            poster,
            resync_interval: config.watcher.resync_interval(),
            listen_addr: config.server.socket_addr()?,
            timeouts: config.server.timeouts(),
        })
    }

    pub fn watcher(&self) -> &Arc<Watcher<S>> {
        &self.watcher
    }

    pub fn poster(&self) -> &Arc<Poster<Watcher<S>>> {
        &self.poster
    }

    pub fn health(&self) -> HealthRegistry {
        HealthRegistry::new(vec![
            self.watcher.clone() as Arc<dyn HealthCheck>,
            self.poster.clone() as Arc<dyn HealthCheck>,
        ])
    }

    /// Binds the configured address and runs until `cancel` fires or the server fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), LifecycleError> {
        self.run_inner(None, cancel).await
    }

    /// Like `run`, on a listener the caller already bound.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), LifecycleError> {
        self.run_inner(Some(listener), cancel).await
    }

    async fn run_inner(
        self,
        listener: Option<TcpListener>,
        cancel: CancellationToken,
    ) -> Result<(), LifecycleError> {
        transition(LifecycleState::Starting);
        let first_error = Arc::new(FirstError::default());

        let watcher_task = {
            let watcher = self.watcher.clone();
            let task_cancel = cancel.clone();
            let resync_interval = self.resync_interval;
            supervise(
                "watcher",
                async move { watcher.run(task_cancel, resync_interval).await },
                cancel.clone(),
                first_error.clone(),
            )
        };
        let poster_task = {
            let poster = self.poster.clone();
            let task_cancel = cancel.clone();
            supervise(
                "poster",
                async move { poster.run(task_cancel).await },
                cancel.clone(),
                first_error.clone(),
            )
        };

        transition(LifecycleState::Running);
        let router = routes::app(self.health());
        let served = match listener {
            Some(listener) => server::serve(listener, router, &self.timeouts, cancel.clone()).await,
            None => {
                server::listen_and_serve(self.listen_addr, router, &self.timeouts, cancel.clone())
                    .await
            }
        };
        if let Err(e) = served {
            first_error.record(e.into());
        }

        transition(LifecycleState::ShuttingDown);
        cancel.cancel();
        for (task, handle) in [("watcher", watcher_task), ("poster", poster_task)] {
            if let Err(source) = handle.await {
                first_error.record(LifecycleError::Task { task, source });
            }
        }
        transition(LifecycleState::Stopped);

        match first_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Runs `fut` as a task. If it panics, or returns while `cancel` is still live,
/// the failure is recorded and `cancel` fires so the rest of the pipeline unwinds.
fn supervise<F>(
    task: &'static str,
    fut: F,
    cancel: CancellationToken,
    first_error: Arc<FirstError>,
) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(fut);
    tokio::spawn(async move {
        let failure = match handle.await {
            Err(source) => Some(LifecycleError::Task { task, source }),
            Ok(()) if !cancel.is_cancelled() => Some(LifecycleError::TaskExited { task }),
            Ok(()) => None,
        };
        if let Some(e) = failure {
            error!(task, error = %e, "task stopped unexpectedly, shutting down");
            first_error.record(e);
            cancel.cancel();
        }
    })
}

/// Keeps the earliest fatal error; later ones are only logged.
#[derive(Default)]
struct FirstError(Mutex<Option<LifecycleError>>);

impl FirstError {
    fn record(&self, e: LifecycleError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(e);
        } else {
            debug!(error = %e, "error after the first fatal error");
        }
    }

    fn take(&self) -> Option<LifecycleError> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

fn transition(state: LifecycleState) {
    info!(%state, "lifecycle");
}

/// Runs the pipeline under a fresh token cancelled by SIGINT or SIGTERM.
pub async fn run_until_signal<S: ResourceSource>(
    pipeline: Pipeline<S>,
) -> Result<(), LifecycleError> {
    let cancel = CancellationToken::new();
    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("Received shutdown signal");
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        })
    };

    let result = pipeline.run(cancel).await;
    signal_task.abort();
    if let Err(e) = &result {
        error!(error = %e, "exiting after fatal error");
    }
    result
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
