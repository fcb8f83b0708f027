// Listener lifecycle: bind failures, graceful drain, shutdown deadline

use axum::{Router, routing::get};
use poolsync::health::{HealthCheck, HealthFlag, HealthRegistry};
use poolsync::routes;
use poolsync::server::{self, ServerError, ServerTimeouts};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct AlwaysHealthy(HealthFlag);

impl HealthCheck for AlwaysHealthy {
    fn name(&self) -> &'static str {
        "always"
    }

    fn is_healthy(&self) -> bool {
        self.0.get()
    }
}

fn timeouts(shutdown: Duration) -> ServerTimeouts {
    ServerTimeouts {
        write: Duration::from_secs(30),
        shutdown,
        ..ServerTimeouts::default()
    }
}

/// Router whose `/slow` handler signals `started`, then sleeps for `delay`.
fn slow_router(started: Arc<Notify>, delay: Duration) -> Router {
    Router::new().route(
        "/slow",
        get(move || {
            let started = started.clone();
            async move {
                started.notify_one();
                tokio::time::sleep(delay).await;
                "done"
            }
        }),
    )
}

#[tokio::test]
async fn bind_failure_is_fatal_and_cancels() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = occupied.local_addr().unwrap();
    let cancel = CancellationToken::new();

    let err = server::listen_and_serve(
        addr,
        Router::new(),
        &ServerTimeouts::default(),
        cancel.clone(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ServerError::Bind { .. }));
    assert!(cancel.is_cancelled());
}

#[tokio::test]
async fn serves_healthz_until_cancelled() {
    let flag = HealthFlag::new();
    flag.set(true);
    let registry = HealthRegistry::new(vec![Arc::new(AlwaysHealthy(flag)) as Arc<dyn HealthCheck>]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            server::serve(listener, routes::app(registry), &timeouts(Duration::from_secs(5)), cancel)
                .await
        })
    };

    let resp = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
    assert!(
        tokio::net::TcpStream::connect(addr).await.is_err(),
        "listener should be closed after shutdown"
    );
}

#[tokio::test]
async fn in_flight_request_completes_during_drain() {
    let started = Arc::new(Notify::new());
    let router = slow_router(started.clone(), Duration::from_millis(200));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            server::serve(listener, router, &timeouts(Duration::from_secs(5)), cancel).await
        })
    };

    let request = tokio::spawn(async move {
        reqwest::get(format!("http://{addr}/slow"))
            .await?
            .text()
            .await
    });
    started.notified().await;
    cancel.cancel();

    assert_eq!(request.await.unwrap().unwrap(), "done");
    assert!(server_task.await.unwrap().is_ok());
}

#[tokio::test]
async fn shutdown_deadline_exceeded_is_reported() {
    let started = Arc::new(Notify::new());
    let router = slow_router(started.clone(), Duration::from_secs(10));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            server::serve(listener, router, &timeouts(Duration::from_millis(100)), cancel).await
        })
    };

    let _request = tokio::spawn(async move { reqwest::get(format!("http://{addr}/slow")).await });
    started.notified().await;
    cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server did not give up draining")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ServerError::ShutdownTimeout(_)));
}
