use anyhow::Context;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extract::EndPolicy;
use crate::server::ServerTimeouts;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
/// hyper refuses smaller read buffers.
const MIN_HEADER_BYTES: usize = 8192;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub watcher: WatcherConfig,
    pub poster: PosterConfig,
    pub server: ServerConfig,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub resync_interval_secs: u64,
    /// Whether a pool without `end` is rejected (true) or published with an empty end.
    pub require_end: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: 300,
            require_end: true,
        }
    }
}

impl WatcherConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn end_policy(&self) -> EndPolicy {
        EndPolicy::from_required(self.require_end)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PosterConfig {
    /// Values at or below the poster's floor fall back to its default interval.
    pub send_interval_ms: u64,
    pub endpoint_url: String,
    pub request_timeout_secs: u64,
}

impl Default for PosterConfig {
    fn default() -> Self {
        Self {
            send_interval_ms: 10_000,
            endpoint_url: "http://localhost:8080/".into(),
            request_timeout_secs: 10,
        }
    }
}

impl PosterConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port`, or `:port` for all interfaces.
    pub listen_addr: String,
    pub shutdown_timeout_secs: u64,
    pub read_timeout_ms: u64,
    pub read_header_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_header_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ":3000".into(),
            shutdown_timeout_secs: 60,
            read_timeout_ms: 5_000,
            read_header_timeout_ms: 2_000,
            write_timeout_ms: 5_000,
            idle_timeout_ms: 5_000,
            max_header_bytes: MIN_HEADER_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = if self.listen_addr.starts_with(':') {
            format!("0.0.0.0{}", self.listen_addr)
        } else {
            self.listen_addr.clone()
        };
        addr.parse()
            .with_context(|| format!("server.listen_addr {:?} is not host:port", self.listen_addr))
    }

    pub fn timeouts(&self) -> ServerTimeouts {
        ServerTimeouts {
            read: Duration::from_millis(self.read_timeout_ms),
            read_header: Duration::from_millis(self.read_header_timeout_ms),
            write: Duration::from_millis(self.write_timeout_ms),
            idle: Duration::from_millis(self.idle_timeout_ms),
            max_header_bytes: self.max_header_bytes,
            shutdown: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Kubeconfig file to use. Unset infers credentials: `$KUBECONFIG`,
    /// `~/.kube/config`, then the in-cluster service account.
    pub kubeconfig: Option<PathBuf>,
    /// Overrides the API server URL from the resolved credentials.
    pub api_url: Option<String>,
    /// API group; empty for the core group.
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name used in API paths.
    pub resource: String,
    /// Empty watches all namespaces.
    pub namespace: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            api_url: None,
            group: "network.harvesterhci.io".into(),
            version: "v1alpha1".into(),
            kind: "IPPool".into(),
            resource: "ippools".into(),
            namespace: String::new(),
        }
    }
}

impl AppConfig {
    /// Loads `$CONFIG_FILE`, else `config.toml` if present, else built-in defaults.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var("CONFIG_FILE") {
            Ok(path) => Self::load_from_path(Path::new(&path)),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH))
            }
            Err(_) => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.watcher.resync_interval_secs > 0,
            "watcher.resync_interval_secs must be > 0, got {}",
            self.watcher.resync_interval_secs
        );
        anyhow::ensure!(
            reqwest::Url::parse(&self.poster.endpoint_url).is_ok(),
            "poster.endpoint_url must be an absolute URL, got {:?}",
            self.poster.endpoint_url
        );
        anyhow::ensure!(
            self.poster.request_timeout_secs > 0,
            "poster.request_timeout_secs must be > 0, got {}",
            self.poster.request_timeout_secs
        );
        self.server.socket_addr()?;
        anyhow::ensure!(
            self.server.shutdown_timeout_secs > 0,
            "server.shutdown_timeout_secs must be > 0, got {}",
            self.server.shutdown_timeout_secs
        );
        for (key, value) in [
            ("server.read_timeout_ms", self.server.read_timeout_ms),
            ("server.read_header_timeout_ms", self.server.read_header_timeout_ms),
            ("server.write_timeout_ms", self.server.write_timeout_ms),
            ("server.idle_timeout_ms", self.server.idle_timeout_ms),
        ] {
            anyhow::ensure!(value > 0, "{key} must be > 0, got {value}");
        }
        anyhow::ensure!(
            self.server.max_header_bytes >= MIN_HEADER_BYTES,
            "server.max_header_bytes must be >= {MIN_HEADER_BYTES}, got {}",
            self.server.max_header_bytes
        );
        if let Some(api_url) = &self.cluster.api_url {
            anyhow::ensure!(
                reqwest::Url::parse(api_url).is_ok(),
                "cluster.api_url must be an absolute URL, got {:?}",
                api_url
            );
        }
        if let Some(path) = &self.cluster.kubeconfig {
            anyhow::ensure!(
                !path.as_os_str().is_empty(),
                "cluster.kubeconfig must be a non-empty path"
            );
        }
        anyhow::ensure!(
            !self.cluster.version.is_empty(),
            "cluster.version must be non-empty"
        );
        anyhow::ensure!(
            !self.cluster.kind.is_empty(),
            "cluster.kind must be non-empty"
        );
        anyhow::ensure!(
            !self.cluster.resource.is_empty(),
            "cluster.resource must be non-empty"
        );
        Ok(())
    }
}
