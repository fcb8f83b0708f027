use poolsync::config::AppConfig;
use poolsync::lifecycle::{self, ExitStatus, Pipeline};
use poolsync::source::ClusterSource;
use poolsync::{poster, version};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    tracing::info!(version = version::VERSION, "starting {}", version::NAME);

    let app_config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = ?e, "invalid configuration");
            return ExitStatus::ConfigError.into();
        }
    };

    let source = match ClusterSource::new(&app_config.cluster).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to build cluster client");
            return ExitStatus::ClientError.into();
        }
    };
    tracing::info!(resource = source.description(), "watching resources");

    let client = match poster::build_client(app_config.poster.request_timeout()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to build publish client");
            return ExitStatus::ClientError.into();
        }
    };

    let pipeline = match Pipeline::new(source, client, &app_config) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = ?e, "invalid configuration");
            return ExitStatus::ConfigError.into();
        }
    };

    match lifecycle::run_until_signal(pipeline).await {
        Ok(()) => ExitStatus::Ok.into(),
        Err(e) => e.exit_status().into(),
    }
}
