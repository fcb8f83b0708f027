// Shared test helpers
#![allow(dead_code)]

use futures_util::StreamExt;
use poolsync::source::{EventStream, ResourceSource, SourceError, WatchEvent};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn pool_object(name: &str, start: &str, end: Option<&str>) -> Value {
    let mut pool = json!({ "start": start });
    if let Some(end) = end {
        pool["end"] = json!(end);
    }
    json!({
        "apiVersion": "network.harvesterhci.io/v1alpha1",
        "kind": "IPPool",
        "metadata": { "name": name, "namespace": "default" },
        "spec": { "ipv4Config": { "pool": pool } }
    })
}

pub type FakeEvent = Result<WatchEvent, SourceError>;

/// In-memory list/watch source. The list result is swappable and watch events
/// are pushed through `FakeHandle`.
#[derive(Clone)]
pub struct FakeSource {
    listed: Arc<Mutex<Option<Vec<Value>>>>,
    events: Arc<Mutex<Option<mpsc::UnboundedReceiver<FakeEvent>>>>,
}

pub struct FakeHandle {
    listed: Arc<Mutex<Option<Vec<Value>>>>,
    tx: mpsc::UnboundedSender<FakeEvent>,
}

impl FakeHandle {
    pub fn send(&self, event: FakeEvent) {
        self.tx.send(event).expect("watch stream dropped");
    }

    /// `None` makes the next list calls fail.
    pub fn set_listed(&self, items: Option<Vec<Value>>) {
        *self.listed.lock().unwrap() = items;
    }
}

pub fn fake_source(items: Vec<Value>) -> (FakeSource, FakeHandle) {
    let listed = Arc::new(Mutex::new(Some(items)));
    let (tx, rx) = mpsc::unbounded_channel();
    let source = FakeSource {
        listed: listed.clone(),
        events: Arc::new(Mutex::new(Some(rx))),
    };
    (source, FakeHandle { listed, tx })
}

impl ResourceSource for FakeSource {
    async fn list(&self) -> Result<Vec<Value>, SourceError> {
        let listed = self.listed.lock().unwrap().clone();
        listed.ok_or_else(source_error)
    }

    fn watch(&self) -> EventStream {
        match self.events.lock().unwrap().take() {
            Some(rx) => futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed(),
            None => futures_util::stream::pending().boxed(),
        }
    }
}

/// Any source failure; the watcher treats them all alike.
pub fn source_error() -> SourceError {
    SourceError::Decode(serde_json::from_str::<Value>("not json").unwrap_err())
}

/// Polls `cond` every 10ms until it holds or `limit` passes.
pub async fn wait_until<F: FnMut() -> bool>(limit: Duration, mut cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
