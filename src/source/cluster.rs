// Cluster-backed source: kube client + kube-runtime watcher over a dynamic resource.

use super::{EventStream, ResourceSource, SourceError, WatchEvent};
use crate::config::ClusterConfig;
use futures_util::{StreamExt, future};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, Config};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to load kubeconfig {path}: {source}")]
    Kubeconfig {
        path: PathBuf,
        source: KubeconfigError,
    },
    #[error("failed to infer cluster config: {0}")]
    Infer(#[from] InferConfigError),
    #[error("invalid API server URL {url:?}: {reason}")]
    Url { url: String, reason: String },
    #[error("failed to build cluster client: {0}")]
    Build(#[from] kube::Error),
}

/// Lists and watches one resource collection through the API server.
#[derive(Clone)]
pub struct ClusterSource {
    api: Api<DynamicObject>,
    description: String,
}

impl ClusterSource {
    /// Resolves credentials from `cluster.kubeconfig` when set, otherwise infers
    /// them (`KUBECONFIG`, `~/.kube/config`, then the in-cluster service account).
    pub async fn new(cluster: &ClusterConfig) -> Result<Self, ClientError> {
        let mut config = match &cluster.kubeconfig {
            Some(path) => {
                let kubeconfig =
                    Kubeconfig::read_from(path).map_err(|source| ClientError::Kubeconfig {
                        path: path.clone(),
                        source,
                    })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|source| ClientError::Kubeconfig {
                        path: path.clone(),
                        source,
                    })?
            }
            None => Config::infer().await?,
        };
        if let Some(url) = &cluster.api_url {
            config.cluster_url =
                url.parse::<axum::http::Uri>()
                    .map_err(|e| ClientError::Url {
                        url: url.clone(),
                        reason: e.to_string(),
                    })?;
        }
        debug!(url = %config.cluster_url, "cluster config resolved");
        let client = Client::try_from(config)?;
        Ok(Self::from_client(client, cluster))
    }

    pub fn from_client(client: Client, cluster: &ClusterConfig) -> Self {
        let gvk = GroupVersionKind::gvk(&cluster.group, &cluster.version, &cluster.kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, &cluster.resource);
        let api = if cluster.namespace.is_empty() {
            Api::all_with(client, &resource)
        } else {
            Api::namespaced_with(client, &cluster.namespace, &resource)
        };
        let description = if cluster.namespace.is_empty() {
            format!("{}/{}", resource.api_version, resource.plural)
        } else {
            format!("{}/{} in {}", resource.api_version, resource.plural, cluster.namespace)
        };
        Self { api, description }
    }

    /// `apiVersion/plural[ in namespace]`, for logs.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl ResourceSource for ClusterSource {
    #[instrument(skip(self), fields(resource = %self.description))]
    async fn list(&self) -> Result<Vec<Value>, SourceError> {
        let list = self.api.list(&ListParams::default()).await?;
        debug!(items = list.items.len(), "listed resources");
        list.items.into_iter().map(to_value).collect()
    }

    /// kube-runtime handles relists on expiry, bookmarks and reconnects with
    /// backoff; here its init phase is folded into one `Restarted`.
    fn watch(&self) -> EventStream {
        let mut initial: Option<Vec<Value>> = None;
        watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .filter_map(move |item| future::ready(map_event(&mut initial, item)))
            .boxed()
    }
}

fn to_value(obj: DynamicObject) -> Result<Value, SourceError> {
    Ok(serde_json::to_value(obj)?)
}

fn map_event(
    initial: &mut Option<Vec<Value>>,
    item: Result<watcher::Event<DynamicObject>, watcher::Error>,
) -> Option<Result<WatchEvent, SourceError>> {
    let event = match item {
        Ok(event) => event,
        Err(e) => return Some(Err(e.into())),
    };
    match event {
        watcher::Event::Apply(obj) => Some(to_value(obj).map(WatchEvent::Applied)),
        watcher::Event::Delete(obj) => Some(to_value(obj).map(WatchEvent::Deleted)),
        watcher::Event::Init => {
            *initial = Some(Vec::new());
            None
        }
        watcher::Event::InitApply(obj) => match to_value(obj) {
            Ok(value) => {
                initial.get_or_insert_with(Vec::new).push(value);
                None
            }
            Err(e) => Some(Err(e)),
        },
        watcher::Event::InitDone => Some(Ok(WatchEvent::Restarted(
            initial.take().unwrap_or_default(),
        ))),
    }
}
