//! Handlers relaying to a runtime process listening on its own address.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use super::durable_objects::{DurableObject, DurableObjectClass};
use super::entrypoint::Entrypoint;
use crate::proxy::wire::{DO_CLASS_HEADER, DO_ID_HEADER};
use crate::proxy::{ProxyClient, ProxyError, RemoteError, RpcCall};

/// Entrypoint served by a runtime at `url`.
///
/// Fetches are forwarded with metadata and the original URL re-encoded in
/// the reserved headers; calls are forwarded as `op: call`.
#[derive(Clone, Debug)]
pub struct UpstreamEntrypoint {
    worker_name: String,
    entrypoint: String,
    url: String,
    client: ProxyClient,
}

impl UpstreamEntrypoint {
    pub fn new(
        worker_name: impl Into<String>,
        entrypoint: impl Into<String>,
        url: impl Into<String>,
        client: ProxyClient,
    ) -> Self {
        Self {
            worker_name: worker_name.into(),
            entrypoint: entrypoint.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl Entrypoint for UpstreamEntrypoint {
    async fn fetch(&self, request: Request) -> Response {
        self.client
            .forward_to(&self.worker_name, &self.url, &BTreeMap::new(), request)
            .await
            .unwrap_or_else(IntoResponse::into_response)
    }

    async fn call(&self, member: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        let call = RpcCall {
            entrypoint: self.entrypoint.clone(),
            member: member.to_string(),
            args,
        };
        self.client
            .call_at(&self.worker_name, &self.url, &BTreeMap::new(), &call)
            .await
            .map_err(|e| e.to_remote_error())
    }
}

/// Durable-object class whose instances live in a runtime at `url`.
#[derive(Clone, Debug)]
pub struct UpstreamDurableObjects {
    worker_name: String,
    class_name: String,
    url: String,
    client: ProxyClient,
}

impl UpstreamDurableObjects {
    pub fn new(
        worker_name: impl Into<String>,
        class_name: impl Into<String>,
        url: impl Into<String>,
        client: ProxyClient,
    ) -> Self {
        Self {
            worker_name: worker_name.into(),
            class_name: class_name.into(),
            url: url.into(),
            client,
        }
    }
}

impl DurableObjectClass for UpstreamDurableObjects {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn instantiate(&self, id: &str) -> Arc<dyn DurableObject> {
        Arc::new(UpstreamDurableObject {
            class: self.clone(),
            id: id.to_string(),
        })
    }
}

struct UpstreamDurableObject {
    class: UpstreamDurableObjects,
    id: String,
}

#[async_trait]
impl DurableObject for UpstreamDurableObject {
    async fn fetch(&self, mut request: Request) -> Response {
        let (Ok(class), Ok(id)) = (
            HeaderValue::from_str(&self.class.class_name),
            HeaderValue::from_str(&self.id),
        ) else {
            return ProxyError::Protocol("invalid durable object address".to_string())
                .into_response();
        };
        request.headers_mut().insert(DO_CLASS_HEADER, class);
        request.headers_mut().insert(DO_ID_HEADER, id);

        self.class
            .client
            .forward_to(&self.class.worker_name, &self.class.url, &BTreeMap::new(), request)
            .await
            .unwrap_or_else(IntoResponse::into_response)
    }
}
