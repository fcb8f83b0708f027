// Resource watcher: keeps a local cache of IPPool objects in sync with the remote
// collection (watch events + periodic full relist) and reports stream health.

use crate::extract::{EndPolicy, ExtractError, extract, object_key};
use crate::health::{HealthCheck, HealthFlag};
use crate::models::IpPool;
use crate::poster::PoolSnapshot;
use crate::source::{ResourceSource, SourceError, WatchEvent};
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Every resource that failed extraction during one snapshot read.
#[derive(Debug, thiserror::Error)]
#[error(
    "failed to parse {} of {total} resources: {}",
    .errors.len(),
    join_errors(.errors)
)]
pub struct SnapshotError {
    pub errors: Vec<ExtractError>,
    pub total: usize,
}

fn join_errors(errors: &[ExtractError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct Watcher<S> {
    source: S,
    cache: RwLock<HashMap<String, Value>>,
    health: HealthFlag,
    end_policy: EndPolicy,
}

impl<S: ResourceSource> Watcher<S> {
    pub fn new(source: S, end_policy: EndPolicy) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
            health: HealthFlag::new(),
            end_policy,
        }
    }

    /// Consumes the watch stream and relists every `resync_interval` (first relist
    /// immediately) until `cancel` fires.
    #[instrument(skip_all, fields(resync_secs = resync_interval.as_secs()))]
    pub async fn run(&self, cancel: CancellationToken, resync_interval: Duration) {
        let mut events = self.source.watch();
        let mut resync = tokio::time::interval(resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("watcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = resync.tick() => {
                    let listed = tokio::select! {
                        _ = cancel.cancelled() => break,
                        listed = self.source.list() => listed,
                    };
                    self.resync(listed).await;
                }
                event = events.next() => match event {
                    Some(Ok(event)) => self.apply(event).await,
                    Some(Err(e)) => {
                        self.health.set(false);
                        warn!(error = %e, operation = "watch", "watch stream error");
                    }
                    None => {
                        // Resyncs keep the cache alive; health recovers on the next good list.
                        self.health.set(false);
                        warn!(operation = "watch", "watch stream ended");
                        events = futures_util::stream::pending().boxed();
                    }
                },
            }
        }
        debug!("watcher shutting down");
    }

    async fn resync(&self, listed: Result<Vec<Value>, SourceError>) {
        match listed {
            Ok(objects) => {
                debug!(operation = "resync", objects = objects.len(), "full relist");
                self.apply(WatchEvent::Restarted(objects)).await;
            }
            Err(e) => {
                self.health.set(false);
                warn!(error = %e, operation = "resync", "full relist failed");
            }
        }
    }

    /// Folds one event into the cache and marks the watcher healthy.
    pub async fn apply(&self, event: WatchEvent) {
        {
            let mut cache = self.cache.write().await;
            match event {
                WatchEvent::Applied(obj) => {
                    cache.insert(object_key(&obj), obj);
                }
                WatchEvent::Deleted(obj) => {
                    cache.remove(&object_key(&obj));
                }
                WatchEvent::Restarted(objects) => {
                    *cache = objects
                        .into_iter()
                        .map(|obj| (object_key(&obj), obj))
                        .collect();
                }
            }
        }
        self.health.set(true);
    }

    /// Current cache contents as pools, sorted by name. Fails as a whole if any
    /// cached resource is incomplete.
    pub async fn snapshot(&self) -> Result<Vec<IpPool>, SnapshotError> {
        let cache = self.cache.read().await;
        let mut pools = Vec::with_capacity(cache.len());
        let mut errors = Vec::new();
        for obj in cache.values() {
            match extract(obj, self.end_policy) {
                Ok(pool) => pools.push(pool),
                Err(e) => errors.push(e),
            }
        }
        let total = cache.len();
        drop(cache);

        if !errors.is_empty() {
            return Err(SnapshotError { errors, total });
        }
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pools)
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

impl<S: ResourceSource> HealthCheck for Watcher<S> {
    fn name(&self) -> &'static str {
        "watcher"
    }

    fn is_healthy(&self) -> bool {
        self.health.get()
    }
}

impl<S: ResourceSource> PoolSnapshot for Watcher<S> {
    fn pools(&self) -> impl Future<Output = Result<Vec<IpPool>, SnapshotError>> + Send {
        self.snapshot()
    }
}
