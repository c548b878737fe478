//! Inbound routers for a session's listeners.

use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::durable_objects::DurableObjectHost;
use super::entrypoint::Entrypoint;
use crate::proxy::wire::{
    op_of, Op, RpcResult, CF_BLOB_HEADER, DO_CLASS_HEADER, DO_ID_HEADER, ORIGINAL_URL_HEADER,
};
use crate::proxy::{rpc_error_response, RemoteError, RequestMetadata, RpcCall};
use crate::tail::TailFanout;

/// Upper bound for buffered RPC bodies.
const MAX_RPC_BODY: usize = 32 * 1024 * 1024;

#[derive(Clone)]
struct EntrypointState {
    worker_name: Arc<str>,
    entrypoint: Arc<str>,
    handler: Arc<dyn Entrypoint>,
    tail: Arc<TailFanout>,
}

/// Router for one entrypoint listener: fetches, `op: call` and `op: tail-drain`.
pub fn entrypoint_router(
    worker_name: &str,
    entrypoint: &str,
    handler: Arc<dyn Entrypoint>,
    tail: Arc<TailFanout>,
) -> Router {
    Router::new()
        .fallback(handle_entrypoint)
        .with_state(EntrypointState {
            worker_name: worker_name.into(),
            entrypoint: entrypoint.into(),
            handler,
            tail,
        })
}

/// Router for the durable-object listener.
pub fn durable_object_router(host: Arc<DurableObjectHost>) -> Router {
    Router::new()
        .fallback(handle_durable_object)
        .with_state(host)
}

/// Move reserved headers back into the request: metadata into extensions
/// and the caller's original URL into the URI.
pub fn restore_request(request: &mut Request) {
    let headers = request.headers_mut();
    let blob = headers.remove(CF_BLOB_HEADER);
    let original_url = headers.remove(ORIGINAL_URL_HEADER);

    if let Some(metadata) = blob
        .as_ref()
        .and_then(|v| v.to_str().ok())
        .and_then(RequestMetadata::decode)
    {
        request.extensions_mut().insert(metadata);
    }
    if let Some(uri) = original_url
        .as_ref()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Uri>().ok())
    {
        *request.uri_mut() = uri;
    }
}

async fn handle_entrypoint(State(state): State<EntrypointState>, mut request: Request) -> Response {
    let op = match op_of(request.headers()) {
        Ok(op) => op,
        Err(raw) => return unknown_op(&raw),
    };

    match op {
        None => {
            restore_request(&mut request);
            state.handler.fetch(request).await
        }
        Some(Op::Call) => {
            let call: RpcCall = match read_json(request).await {
                Ok(call) => call,
                Err(response) => return response,
            };
            if call.entrypoint != *state.entrypoint {
                warn!(
                    worker = %state.worker_name,
                    entrypoint = %state.entrypoint,
                    requested = %call.entrypoint,
                    "RPC call addressed to another entrypoint"
                );
                return rpc_error_response(&misrouted_call(&state, &call));
            }
            debug!(worker = %state.worker_name, member = %call.member, "RPC call");
            rpc_response(state.handler.call(&call.member, call.args).await)
        }
        Some(Op::TailDrain) => {
            let events = state.tail.drain(&state.worker_name);
            debug!(worker = %state.worker_name, count = events.len(), "tail drained");
            Json(events).into_response()
        }
        // events are published by the session's own runtime, through its gateway
        Some(Op::TailPublish) => unknown_op(Op::TailPublish.as_str()),
    }
}

fn misrouted_call(state: &EntrypointState, call: &RpcCall) -> RemoteError {
    RemoteError::new(format!(
        "Cannot access \"{}\": the call is for the \"{}\" entrypoint but reached the \"{}\" entrypoint of \"{}\".",
        call.member, call.entrypoint, state.entrypoint, state.worker_name
    ))
}

async fn handle_durable_object(
    State(host): State<Arc<DurableObjectHost>>,
    mut request: Request,
) -> Response {
    let headers = request.headers_mut();
    let class = headers
        .remove(DO_CLASS_HEADER)
        .and_then(|v| v.to_str().ok().map(str::to_string));
    let id = headers
        .remove(DO_ID_HEADER)
        .and_then(|v| v.to_str().ok().map(str::to_string));
    let (Some(class), Some(id)) = (class, id) else {
        return (
            StatusCode::BAD_REQUEST,
            "missing durable object class or id",
        )
            .into_response();
    };

    match op_of(request.headers()) {
        Ok(None) => {
            restore_request(&mut request);
            host.fetch(&class, &id, request).await
        }
        Ok(Some(_)) => rpc_error_response(&RemoteError::new(format!(
            "Durable Object \"{}\" only accepts fetch from other sessions",
            class
        ))),
        Err(raw) => unknown_op(&raw),
    }
}

pub(crate) fn rpc_response(result: Result<serde_json::Value, RemoteError>) -> Response {
    match result {
        Ok(result) => Json(RpcResult { result }).into_response(),
        Err(error) => rpc_error_response(&error),
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(request: Request) -> Result<T, Response> {
    let bytes = to_bytes(request.into_body(), MAX_RPC_BODY)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())?;
    serde_json::from_slice(&bytes)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid call: {}", e)).into_response())
}

pub(crate) fn unknown_op(raw: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        format!("unknown operation {:?}", raw),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::HeaderValue;
    use serde_json::{json, Value};

    #[test]
    fn test_restore_request() {
        let metadata = RequestMetadata(json!({ "colo": "LIS" }));
        let mut request = Request::builder()
            .uri("/local")
            .header(CF_BLOB_HEADER, metadata.encode())
            .header(ORIGINAL_URL_HEADER, "https://example.com/orig?x=1")
            .header("x-other", "kept")
            .body(Body::empty())
            .unwrap();

        restore_request(&mut request);

        assert_eq!(request.uri(), "https://example.com/orig?x=1");
        assert_eq!(request.extensions().get::<RequestMetadata>(), Some(&metadata));
        assert!(request.headers().get(CF_BLOB_HEADER).is_none());
        assert!(request.headers().get(ORIGINAL_URL_HEADER).is_none());
        assert_eq!(request.headers()["x-other"], HeaderValue::from_static("kept"));
    }

    #[test]
    fn test_restore_request_without_reserved_headers() {
        let mut request = Request::builder().uri("/plain").body(Body::empty()).unwrap();
        restore_request(&mut request);
        assert_eq!(request.uri(), "/plain");
        assert!(request.extensions().get::<RequestMetadata>().is_none());
    }

    struct Echo;

    #[async_trait]
    impl Entrypoint for Echo {
        async fn fetch(&self, request: Request) -> Response {
            request.uri().to_string().into_response()
        }

        async fn call(&self, member: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
            match member {
                "echo" => Ok(Value::Array(args)),
                _ => Err(RemoteError::new("nope")),
            }
        }
    }

    fn state() -> EntrypointState {
        EntrypointState {
            worker_name: "w".into(),
            entrypoint: "default".into(),
            handler: Arc::new(Echo),
            tail: Arc::new(TailFanout::new()),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_call_dispatch() {
        let request = Request::builder()
            .header("x-dev-registry-op", "call")
            .body(Body::from(
                json!({ "entrypoint": "default", "member": "echo", "args": [1, 2] }).to_string(),
            ))
            .unwrap();

        let response = handle_entrypoint(State(state()), request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "result": [1, 2] }));
    }

    #[tokio::test]
    async fn test_thrown_error_dispatch() {
        let request = Request::builder()
            .header("x-dev-registry-op", "call")
            .body(Body::from(
                json!({ "entrypoint": "default", "member": "other" }).to_string(),
            ))
            .unwrap();

        let response = handle_entrypoint(State(state()), request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["x-dev-registry-error"], "true");
        assert_eq!(body_json(response).await["message"], "nope");
    }

    #[tokio::test]
    async fn test_tail_drain_dispatch() {
        let state = state();
        state.tail.publish("w", json!("line"));
        state.tail.publish("other", json!("not mine"));

        let request = Request::builder()
            .header("x-dev-registry-op", "tail-drain")
            .body(Body::empty())
            .unwrap();
        let response = handle_entrypoint(State(state.clone()), request).await;

        let events = body_json(response).await;
        assert_eq!(events.as_array().unwrap().len(), 1);
        assert_eq!(events[0]["payload"], "line");
        assert_eq!(state.tail.pending("other"), 1);
    }

    #[tokio::test]
    async fn test_call_for_another_entrypoint_is_thrown() {
        let request = Request::builder()
            .header("x-dev-registry-op", "call")
            .body(Body::from(
                json!({ "entrypoint": "Admin", "member": "echo", "args": [1] }).to_string(),
            ))
            .unwrap();

        let response = handle_entrypoint(State(state()), request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["x-dev-registry-error"], "true");
        let thrown = body_json(response).await;
        assert_eq!(
            thrown["message"],
            "Cannot access \"echo\": the call is for the \"Admin\" entrypoint but reached the \"default\" entrypoint of \"w\"."
        );
    }

    #[tokio::test]
    async fn test_tail_publish_is_not_accepted_inbound() {
        let state = state();
        let request = Request::builder()
            .header("x-dev-registry-op", "tail-publish")
            .body(Body::from(json!(["line"]).to_string()))
            .unwrap();
        let response = handle_entrypoint(State(state.clone()), request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.tail.pending("w"), 0);
    }

    #[tokio::test]
    async fn test_unknown_op_is_rejected() {
        let request = Request::builder()
            .header("x-dev-registry-op", "teleport")
            .body(Body::empty())
            .unwrap();
        let response = handle_entrypoint(State(state()), request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
