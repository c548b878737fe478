#![allow(dead_code)] // Test helpers appear unused when compiled independently

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use dev_registry::proxy::wire::{CF_BLOB_HEADER, ORIGINAL_URL_HEADER};
use dev_registry::{
    BindingResolver, Entrypoint, ProxyClient, RegistryStore, RemoteError, RequestMetadata,
    ServiceBinding,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

const WAIT_ATTEMPTS: usize = 50;
const WAIT_DELAY: Duration = Duration::from_millis(100);

/// Find an available TCP port
pub async fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Best-effort check for whether binding to loopback is permitted in the current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

/// A registry in its own temp dir, so tests never see each other's sessions.
pub fn isolated_registry() -> (TempDir, RegistryStore) {
    let dir = TempDir::new().expect("failed to create registry dir");
    let store = RegistryStore::new(dir.path());
    (dir, store)
}

pub fn resolver_and_client(store: &RegistryStore) -> (BindingResolver, ProxyClient) {
    (
        BindingResolver::new(store.clone()),
        ProxyClient::new().expect("failed to build proxy client"),
    )
}

pub fn service_binding(
    store: &RegistryStore,
    service: &str,
    entrypoint: Option<&str>,
) -> ServiceBinding {
    let (resolver, client) = resolver_and_client(store);
    ServiceBinding::new(service, entrypoint.map(str::to_string), resolver, client)
}

pub fn get(path: &str) -> Request {
    Request::builder()
        .uri(format!("http://placeholder{}", path))
        .body(Body::empty())
        .unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    String::from_utf8_lossy(&bytes).into_owned()
}

pub async fn poll_until<T, F, Fut>(mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..WAIT_ATTEMPTS {
        if let Some(result) = f().await {
            return Some(result);
        }
        tokio::time::sleep(WAIT_DELAY).await;
    }
    None
}

/// Replies to every fetch with a fixed body; `ping` answers `"pong"`.
pub struct Responder(pub &'static str);

#[async_trait]
impl Entrypoint for Responder {
    async fn fetch(&self, _request: Request) -> Response {
        self.0.into_response()
    }

    async fn call(&self, member: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        match member {
            "ping" => Ok(json!("pong")),
            "whoami" => Ok(json!(self.0)),
            "add" => Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>())),
            "fail" => Err(RemoteError::new("intentional failure").with_name("RangeError")),
            other => Err(dev_registry::session::missing_member(other)),
        }
    }
}

/// Describes the request it received: URL, method, metadata, selected headers and body.
pub struct Inspector;

#[async_trait]
impl Entrypoint for Inspector {
    async fn fetch(&self, request: Request) -> Response {
        let url = request.uri().to_string();
        let method = request.method().to_string();
        let metadata = request
            .extensions()
            .get::<RequestMetadata>()
            .map(|m| m.0.clone());
        let headers: Value = request
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or_default())))
            .collect::<serde_json::Map<_, _>>()
            .into();
        let body = to_bytes(request.into_body(), usize::MAX).await.unwrap();

        Json(json!({
            "url": url,
            "method": method,
            "metadata": metadata,
            "headers": headers,
            "body": String::from_utf8_lossy(&body),
        }))
        .into_response()
    }
}

/// Streams `chunks` numbered chunks, `delay` apart.
pub struct Streamer {
    pub chunks: usize,
    pub delay: Duration,
}

pub fn chunk_text(i: usize) -> String {
    format!("chunk-{:03};", i)
}

#[async_trait]
impl Entrypoint for Streamer {
    async fn fetch(&self, _request: Request) -> Response {
        let chunks = self.chunks;
        let delay = self.delay;
        let stream = futures::stream::unfold(0usize, move |i| async move {
            if i >= chunks {
                return None;
            }
            tokio::time::sleep(delay).await;
            Some((Ok::<_, std::io::Error>(Bytes::from(chunk_text(i))), i + 1))
        });
        Response::new(Body::from_stream(stream))
    }
}

/// Forwards every fetch through a service binding, like a worker calling its dependency.
pub struct Forwarder(pub ServiceBinding);

#[async_trait]
impl Entrypoint for Forwarder {
    async fn fetch(&self, request: Request) -> Response {
        self.0
            .fetch(request)
            .await
            .unwrap_or_else(IntoResponse::into_response)
    }

    async fn call(&self, member: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        self.0
            .call(member, args)
            .await
            .map_err(|e| e.to_remote_error())
    }
}

#[derive(Clone, Default)]
struct RuntimeState {
    requests: Arc<Mutex<Vec<Value>>>,
}

/// Stand-in for a runtime process that a `serve` session fronts.
pub struct MockRuntime {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    state: RuntimeState,
}

impl MockRuntime {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }

    pub async fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().await.clone()
    }
}

/// Spawn the mock runtime, return (server handle, base URL)
pub async fn spawn_mock_runtime(port: u16) -> (MockRuntime, String) {
    let state = RuntimeState::default();

    let app = Router::new()
        .fallback(runtime_handler)
        .with_state(state.clone());

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("failed to bind mock runtime listener");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("mock runtime server error: {}", err);
        }
    });

    (
        MockRuntime {
            shutdown_tx,
            handle,
            state,
        },
        format!("http://127.0.0.1:{}", port),
    )
}

/// Records each request; answers RPC calls with `{"result": "<member> from runtime"}`.
async fn runtime_handler(
    State(state): State<RuntimeState>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let path = request.uri().to_string();
    let body = to_bytes(request.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));

    state.requests.lock().await.push(json!({
        "path": path,
        "op": header("x-dev-registry-op"),
        "original_url": header(ORIGINAL_URL_HEADER),
        "cf_blob": header(CF_BLOB_HEADER),
        "do_class": header("x-dev-registry-do-class"),
        "do_id": header("x-dev-registry-do-id"),
        "body": body,
    }));

    if header("x-dev-registry-op").as_deref() == Some("call") {
        let member = body["member"].as_str().unwrap_or_default().to_string();
        return Json(json!({ "result": format!("{} from runtime", member) })).into_response();
    }
    (StatusCode::OK, format!("runtime saw {}", path)).into_response()
}
