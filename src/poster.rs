// Periodic publisher: every send interval, reads the current pool snapshot and
// POSTs it as JSON to the downstream endpoint. A failed cycle only flips health;
// the next tick retries.

use crate::health::{HealthCheck, HealthFlag};
use crate::models::IpPool;
use crate::version::USER_AGENT;
use crate::watcher::SnapshotError;
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(10);
pub const MIN_SEND_INTERVAL: Duration = Duration::from_secs(1);
/// Cap on how much of an error response body is read.
pub const MAX_RESPONSE_BODY: usize = 4096;

/// Read access to the current set of pools.
pub trait PoolSnapshot: Send + Sync + 'static {
    fn pools(&self) -> impl Future<Output = Result<Vec<IpPool>, SnapshotError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("snapshot unavailable: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("failed to encode pools: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to make request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response from server, code: {status} with message: {body:?}")]
    UnexpectedResponse { status: u16, body: String },
    #[error("publish cancelled")]
    Cancelled,
}

/// Intervals at or below the floor fall back to the default.
pub fn effective_send_interval(configured: Duration) -> Duration {
    if configured <= MIN_SEND_INTERVAL {
        DEFAULT_SEND_INTERVAL
    } else {
        configured
    }
}

/// HTTP client used for publishing: fixed user agent and an overall request timeout.
pub fn build_client(request_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(request_timeout)
        .build()
}

pub struct Poster<P> {
    pools: Arc<P>,
    client: reqwest::Client,
    endpoint_url: String,
    send_interval: Duration,
    health: HealthFlag,
}

impl<P: PoolSnapshot> Poster<P> {
    pub fn new(
        pools: Arc<P>,
        client: reqwest::Client,
        endpoint_url: impl Into<String>,
        send_interval: Duration,
    ) -> Self {
        Self {
            pools,
            client,
            endpoint_url: endpoint_url.into(),
            send_interval: effective_send_interval(send_interval),
            health: HealthFlag::new(),
        }
    }

    pub fn send_interval(&self) -> Duration {
        self.send_interval
    }

    /// Publishes once per send interval (first send one interval after start)
    /// until `cancel` fires.
    #[instrument(skip_all, fields(endpoint = %self.endpoint_url, interval_ms = self.send_interval.as_millis() as u64))]
    pub async fn run(&self, cancel: CancellationToken) {
        let mut tick =
            tokio::time::interval_at(Instant::now() + self.send_interval, self.send_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("poster started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    match self.publish_once(&cancel).await {
                        Ok(count) => debug!(operation = "publish", pools = count, "pools published"),
                        Err(PublishError::Cancelled) => break,
                        Err(e) => warn!(error = %e, operation = "publish", "publish cycle failed"),
                    }
                }
            }
        }
        debug!("poster shutting down");
    }

    /// One publish cycle. Health ends false on any failure except cancellation.
    pub async fn publish_once(&self, cancel: &CancellationToken) -> Result<usize, PublishError> {
        let pools = match self.pools.pools().await {
            Ok(pools) => pools,
            Err(e) => {
                self.health.set(false);
                return Err(e.into());
            }
        };
        self.health.set(true);

        let sent = tokio::select! {
            _ = cancel.cancelled() => return Err(PublishError::Cancelled),
            sent = self.post(&pools) => sent,
        };
        if let Err(e) = sent {
            self.health.set(false);
            return Err(e);
        }
        Ok(pools.len())
    }

    async fn post(&self, pools: &[IpPool]) -> Result<(), PublishError> {
        let body = serde_json::to_vec(pools)?;
        let resp = self
            .client
            .post(&self.endpoint_url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONNECTION, "close")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = read_body_prefix(resp, MAX_RESPONSE_BODY).await;
            return Err(PublishError::UnexpectedResponse {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Reads at most `limit` bytes of the body. Read errors end the prefix early.
async fn read_body_prefix(mut resp: reqwest::Response, limit: usize) -> String {
    let mut buf = Vec::new();
    while buf.len() < limit {
        match resp.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "error body cut short");
                break;
            }
        }
    }
    buf.truncate(limit);
    String::from_utf8_lossy(&buf).into_owned()
}

impl<P: PoolSnapshot> HealthCheck for Poster<P> {
    fn name(&self) -> &'static str {
        "poster"
    }

    fn is_healthy(&self) -> bool {
        self.health.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_at_or_below_floor_uses_default() {
        assert_eq!(effective_send_interval(Duration::ZERO), DEFAULT_SEND_INTERVAL);
        assert_eq!(effective_send_interval(MIN_SEND_INTERVAL), DEFAULT_SEND_INTERVAL);
        assert_eq!(
            effective_send_interval(Duration::from_millis(1500)),
            Duration::from_millis(1500)
        );
        assert_eq!(
            effective_send_interval(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn unexpected_response_mentions_status_and_body() {
        let e = PublishError::UnexpectedResponse {
            status: 500,
            body: "db down".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("db down"));
    }
}
