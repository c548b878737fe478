//! Outbound gateway: the loopback listener a runtime calls to use its bindings.
//!
//! `x-dev-registry-binding: <name>` selects a service binding, and
//! `x-dev-registry-do-binding: <name>` plus `x-dev-registry-do-id` select a
//! durable-object stub. `op: call` turns either into member access. A bare
//! `op: tail-drain` polls the session's tail subscription, and a bare
//! `op: tail-publish` queues the runtime's own events for its consumers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::router::{read_json, rpc_response, unknown_op};
use super::runner::{serve, SessionError};
use crate::binding::{DurableObjectNamespace, ServiceBinding};
use crate::proxy::wire::{op_of, Op, BINDING_HEADER, DO_BINDING_HEADER, DO_ID_HEADER};
use crate::proxy::{ProxyError, RpcCall};
use crate::tail::{TailFanout, TailSubscription};

#[derive(Debug, Default)]
pub struct Gateway {
    services: HashMap<String, ServiceBinding>,
    durable_objects: HashMap<String, DurableObjectNamespace>,
    tails: Option<TailSubscription>,
    events: Option<(String, Arc<TailFanout>)>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, binding: impl Into<String>, service: ServiceBinding) -> Self {
        self.services.insert(binding.into(), service);
        self
    }

    pub fn durable_object(
        mut self,
        binding: impl Into<String>,
        namespace: DurableObjectNamespace,
    ) -> Self {
        self.durable_objects.insert(binding.into(), namespace);
        self
    }

    pub fn tails(mut self, subscription: TailSubscription) -> Self {
        self.tails = Some(subscription);
        self
    }

    /// Queue `op: tail-publish` batches as events of `worker_name`.
    pub fn tail_events(mut self, worker_name: impl Into<String>, fanout: Arc<TailFanout>) -> Self {
        self.events = Some((worker_name.into(), fanout));
        self
    }

    pub fn router(self) -> Router {
        Router::new()
            .fallback(handle_gateway)
            .with_state(Arc::new(self))
    }

    pub async fn bind(self, host: &str, port: u16) -> Result<RunningGateway, SessionError> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| SessionError::Bind {
                addr: format!("{}:{}", host, port),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| SessionError::Bind {
            addr: format!("{}:{}", host, port),
            source,
        })?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = serve(listener, self.router(), shutdown_rx);
        info!(%addr, "binding gateway listening");

        Ok(RunningGateway {
            addr,
            shutdown,
            handle,
        })
    }
}

pub struct RunningGateway {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RunningGateway {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

fn header_string(request: &mut Request, name: &str) -> Option<String> {
    request
        .headers_mut()
        .remove(name)
        .and_then(|v| v.to_str().ok().map(str::to_string))
}

async fn handle_gateway(State(gateway): State<Arc<Gateway>>, mut request: Request) -> Response {
    let op = match op_of(request.headers()) {
        Ok(op) => op,
        Err(raw) => return unknown_op(&raw),
    };

    if let Some(name) = header_string(&mut request, BINDING_HEADER) {
        let Some(service) = gateway.services.get(&name) else {
            return no_binding(&name);
        };
        debug!(binding = %name, service = %service.service(), "service binding call");
        return match op {
            None => service
                .fetch(request)
                .await
                .unwrap_or_else(IntoResponse::into_response),
            Some(Op::Call) => match read_json::<RpcCall>(request).await {
                Ok(call) => call_response(service.call(&call.member, call.args).await),
                Err(response) => response,
            },
            Some(op @ (Op::TailDrain | Op::TailPublish)) => unknown_op(op.as_str()),
        };
    }

    if let Some(name) = header_string(&mut request, DO_BINDING_HEADER) {
        let Some(namespace) = gateway.durable_objects.get(&name) else {
            return no_binding(&name);
        };
        let Some(id) = header_string(&mut request, DO_ID_HEADER) else {
            return (StatusCode::BAD_REQUEST, "missing durable object id").into_response();
        };
        let stub = namespace.get(id);
        debug!(binding = %name, class = %namespace.class_name(), id = %stub.id(), "durable object call");
        return match op {
            None => stub
                .fetch(request)
                .await
                .unwrap_or_else(IntoResponse::into_response),
            Some(Op::Call) => match read_json::<RpcCall>(request).await {
                Ok(call) => call_response(stub.call(&call.member, call.args).await),
                Err(response) => response,
            },
            Some(op @ (Op::TailDrain | Op::TailPublish)) => unknown_op(op.as_str()),
        };
    }

    match op {
        Some(Op::TailDrain) => match &gateway.tails {
            Some(tails) => Json(tails.poll().await).into_response(),
            None => Json(Vec::<serde_json::Value>::new()).into_response(),
        },
        Some(Op::TailPublish) => publish_events(&gateway, request).await,
        _ => (StatusCode::BAD_REQUEST, "request names no binding").into_response(),
    }
}

async fn publish_events(gateway: &Gateway, request: Request) -> Response {
    let Some((worker_name, fanout)) = &gateway.events else {
        return unknown_op(Op::TailPublish.as_str());
    };
    let payloads: Vec<serde_json::Value> = match read_json(request).await {
        Ok(payloads) => payloads,
        Err(response) => return response,
    };
    let count = payloads.len();
    fanout.publish_all(worker_name, payloads);
    debug!(worker = %worker_name, count, "tail events published");
    (StatusCode::ACCEPTED, Json(json!({ "published": count }))).into_response()
}

fn call_response(result: Result<serde_json::Value, ProxyError>) -> Response {
    match result {
        Ok(value) => rpc_response(Ok(value)),
        Err(e) => e.into_rpc_response(),
    }
}

fn no_binding(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        format!("no binding named \"{}\"", name),
    )
        .into_response()
}
