// tests/e2e_cancellation.rs
//! Caller-side cancellation reaches the target session's handler.
mod helpers;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use dev_registry::{Entrypoint, SessionBuilder};
use futures::StreamExt;
use helpers::{can_bind_loopback, isolated_registry, poll_until, service_binding, Forwarder};

/// Streams chunks forever, counting each one it produces.
struct Endless {
    produced: Arc<AtomicUsize>,
}

#[async_trait]
impl Entrypoint for Endless {
    async fn fetch(&self, _request: Request) -> Response {
        let produced = self.produced.clone();
        let stream = futures::stream::unfold(produced, |produced| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let n = produced.fetch_add(1, Ordering::SeqCst);
            let chunk = Bytes::from(format!("tick-{};", n));
            Some((Ok::<_, std::io::Error>(chunk), produced))
        });
        Response::new(Body::from_stream(stream))
    }
}

/// Sets `dropped` when the handler future goes away.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Never answers; records whether its handler finished or was dropped.
struct Hanging {
    completed: Arc<AtomicBool>,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl Entrypoint for Hanging {
    async fn fetch(&self, _request: Request) -> Response {
        let _guard = DropFlag(self.dropped.clone());
        std::future::pending::<()>().await;
        self.completed.store(true, Ordering::SeqCst);
        "finished".into_response()
    }
}

#[tokio::test]
async fn test_dropping_streamed_response_stops_producer() {
    if !can_bind_loopback().await {
        eprintln!("skipping e2e cancellation test: cannot bind to loopback in this environment");
        return;
    }

    let (_dir, store) = isolated_registry();
    let produced = Arc::new(AtomicUsize::new(0));
    let target = SessionBuilder::new("endless")
        .default_entrypoint(Arc::new(Endless {
            produced: produced.clone(),
        }))
        .start(store.clone())
        .await
        .unwrap();
    let caller = SessionBuilder::new("caller")
        .default_entrypoint(Arc::new(Forwarder(service_binding(&store, "endless", None))))
        .start(store.clone())
        .await
        .unwrap();

    let response = reqwest::get(caller.url("default").unwrap()).await.unwrap();
    assert_eq!(response.status(), 200);
    let mut stream = response.bytes_stream();
    let first = stream.next().await.unwrap().unwrap();
    assert!(first.starts_with(b"tick-"));

    drop(stream);

    // the producer may flush a few chunks into socket buffers before noticing
    tokio::time::sleep(Duration::from_millis(500)).await;
    let after_abort = produced.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(produced.load(Ordering::SeqCst), after_abort);

    caller.stop().await.unwrap();
    target.stop().await.unwrap();
}

#[tokio::test]
async fn test_client_timeout_drops_target_handler() {
    if !can_bind_loopback().await {
        eprintln!("skipping e2e cancellation test: cannot bind to loopback in this environment");
        return;
    }

    let (_dir, store) = isolated_registry();
    let completed = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let target = SessionBuilder::new("hanging")
        .default_entrypoint(Arc::new(Hanging {
            completed: completed.clone(),
            dropped: dropped.clone(),
        }))
        .start(store.clone())
        .await
        .unwrap();
    let caller = SessionBuilder::new("caller")
        .default_entrypoint(Arc::new(Forwarder(service_binding(&store, "hanging", None))))
        .start(store.clone())
        .await
        .unwrap();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let err = client
        .get(format!("{}/slow", caller.url("default").unwrap()))
        .send()
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let was_dropped = poll_until(|| {
        let dropped = dropped.clone();
        async move { dropped.load(Ordering::SeqCst).then_some(()) }
    })
    .await;
    assert!(was_dropped.is_some(), "target handler was never dropped");
    assert!(!completed.load(Ordering::SeqCst));

    caller.stop().await.unwrap();
    target.stop().await.unwrap();
}
