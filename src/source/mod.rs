// Remote watch API seam. The watcher only sees list + a self-healing event stream.

mod cluster;

pub use cluster::{ClientError, ClusterSource};

use futures_util::stream::BoxStream;
use serde_json::Value;
use std::future::Future;

/// A change observed on the remote collection.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Object added or modified.
    Applied(Value),
    Deleted(Value),
    /// Full relist after the stream had to start over.
    Restarted(Vec<Value>),
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("API request failed: {0}")]
    Kube(#[from] kube::Error),
    #[error("watch stream error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),
    #[error("failed to convert resource: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type EventStream = BoxStream<'static, Result<WatchEvent, SourceError>>;

/// List/watch access to one resource collection.
///
/// `watch` must keep reconnecting on its own: errors are yielded as items and
/// the stream carries on after them.
pub trait ResourceSource: Send + Sync + 'static {
    fn list(&self) -> impl Future<Output = Result<Vec<Value>, SourceError>> + Send;
    fn watch(&self) -> EventStream;
}
