//! Shared HTTP client that carries every hop between dev sessions.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use axum::body::{Body, BodyDataStream, HttpBody};
use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use bytes::Bytes;
use futures::Stream;
use reqwest::{redirect, Client};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::ProxyError;
use super::wire::{
    forwardable_headers, Op, RemoteError, RequestMetadata, RpcCall, RpcResult, CF_BLOB_HEADER,
    ERROR_HEADER, OP_HEADER, ORIGINAL_URL_HEADER,
};
use crate::resolver::ResolvedTarget;
use crate::tail::TailEvent;

/// Cloneable handle over one connection pool.
///
/// No overall timeout: a streamed response may stay open as long as the
/// request it answers. Certificates are not verified because every target is
/// a local dev session, often serving a self-signed certificate.
#[derive(Clone, Debug)]
pub struct ProxyClient {
    client: Client,
}

impl ProxyClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    /// Forward `request` to a resolved session and relay its streamed response.
    pub async fn forward(
        &self,
        target: &ResolvedTarget,
        request: Request,
    ) -> Result<Response, ProxyError> {
        self.forward_to(
            &target.worker_name,
            &target.base_url(),
            &target.headers,
            request,
        )
        .await
    }

    /// Forward `request` to `base_url`, keeping its path and query.
    ///
    /// The first hop records the caller's URL and metadata in the reserved
    /// headers; later hops pass those headers on untouched.
    pub async fn forward_to(
        &self,
        worker: &str,
        base_url: &str,
        extra_headers: &BTreeMap<String, String>,
        request: Request,
    ) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);

        let mut headers = forwardable_headers(&parts.headers);
        if !headers.contains_key(ORIGINAL_URL_HEADER) {
            if let Some(value) = original_url(&parts).and_then(|u| HeaderValue::from_str(&u).ok())
            {
                headers.insert(ORIGINAL_URL_HEADER, value);
            }
        }
        if !headers.contains_key(CF_BLOB_HEADER) {
            if let Some(metadata) = parts.extensions.get::<RequestMetadata>() {
                if let Ok(value) = HeaderValue::from_str(&metadata.encode()) {
                    headers.insert(CF_BLOB_HEADER, value);
                }
            }
        }
        extend_headers(&mut headers, extra_headers);

        let mut builder = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers);
        if HttpBody::size_hint(&body).exact() != Some(0) {
            builder = builder.body(reqwest::Body::wrap_stream(SyncBodyStream::new(
                body.into_data_stream(),
            )));
        }

        let upstream = builder.send().await.map_err(|source| ProxyError::Transport {
            worker: worker.to_string(),
            url: url.clone(),
            source,
        })?;

        debug!(
            worker,
            target = %url,
            method = %parts.method,
            status = upstream.status().as_u16(),
            "forwarded request"
        );
        Ok(relay_response(upstream))
    }

    /// Invoke a member on a resolved entrypoint.
    pub async fn call(&self, target: &ResolvedTarget, call: &RpcCall) -> Result<Value, ProxyError> {
        self.call_at(&target.worker_name, &target.base_url(), &target.headers, call)
            .await
    }

    /// Invoke a member on whatever listens at `base_url`.
    pub async fn call_at(
        &self,
        worker: &str,
        base_url: &str,
        extra_headers: &BTreeMap<String, String>,
        call: &RpcCall,
    ) -> Result<Value, ProxyError> {
        let body = self
            .operation(worker, base_url, extra_headers, Op::Call, call)
            .await?;
        let result: RpcResult = serde_json::from_slice(&body)
            .map_err(|e| ProxyError::Protocol(format!("invalid RPC result: {}", e)))?;
        Ok(result.result)
    }

    /// Drain the tail queue a producer session keeps for its own worker.
    pub async fn drain_tail(&self, target: &ResolvedTarget) -> Result<Vec<TailEvent>, ProxyError> {
        let body = self
            .operation(
                &target.worker_name,
                &target.base_url(),
                &target.headers,
                Op::TailDrain,
                &serde_json::json!({}),
            )
            .await?;
        serde_json::from_slice(&body)
            .map_err(|e| ProxyError::Protocol(format!("invalid tail batch: {}", e)))
    }

    async fn operation(
        &self,
        worker: &str,
        base_url: &str,
        extra_headers: &BTreeMap<String, String>,
        op: Op,
        body: &impl Serialize,
    ) -> Result<Bytes, ProxyError> {
        let url = format!("{}/", base_url.trim_end_matches('/'));
        let mut headers = HeaderMap::new();
        extend_headers(&mut headers, extra_headers);
        headers.insert(OP_HEADER, HeaderValue::from_static(op.as_str()));

        let transport = |source: reqwest::Error| ProxyError::Transport {
            worker: worker.to_string(),
            url: url.clone(),
            source,
        };

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let thrown = response
            .headers()
            .get(ERROR_HEADER)
            .is_some_and(|v| v.as_bytes() == b"true");
        let bytes = response.bytes().await.map_err(transport)?;

        debug!(
            worker,
            op = op.as_str(),
            status = status.as_u16(),
            "operation completed"
        );

        if thrown {
            let remote: RemoteError = serde_json::from_slice(&bytes)
                .map_err(|e| ProxyError::Protocol(format!("invalid thrown error: {}", e)))?;
            return Err(ProxyError::Remote(remote));
        }
        if !status.is_success() {
            return Err(ProxyError::Protocol(format!(
                "HTTP {} for {}: {}",
                status,
                op.as_str(),
                String::from_utf8_lossy(&bytes)
            )));
        }
        Ok(bytes)
    }
}

fn original_url(parts: &Parts) -> Option<String> {
    if parts.uri.scheme().is_some() {
        return Some(parts.uri.to_string());
    }
    let host = parts.headers.get("host")?.to_str().ok()?;
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Some(format!("http://{}{}", host, path))
}

fn extend_headers(headers: &mut HeaderMap, extra: &BTreeMap<String, String>) {
    for (name, value) in extra {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "skipping invalid descriptor header"),
        }
    }
}

fn relay_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = forwardable_headers(upstream.headers());
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Request body stream that is `Sync`, as `reqwest::Body::wrap_stream` requires.
///
/// The mutex is only reached through `&mut self`, so it is never contended.
struct SyncBodyStream(Mutex<BodyDataStream>);

impl SyncBodyStream {
    fn new(stream: BodyDataStream) -> Self {
        Self(Mutex::new(stream))
    }
}

impl Stream for SyncBodyStream {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let inner = self
            .get_mut()
            .0
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        Pin::new(inner).poll_next(cx)
    }
}
