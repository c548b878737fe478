//! Bindings as worker code sees them.
//!
//! A binding holds no connection and no cached address: every call resolves
//! its target again, so it keeps working across restarts of the other side.

use std::sync::Arc;

use axum::extract::Request;
use axum::response::Response;
use serde_json::Value;

use crate::proxy::{DurableObjectProxy, FetchProxy, ProxyClient, ProxyError, RpcProxy};
use crate::resolver::BindingResolver;
use crate::session::DurableObjectHost;

/// Service binding to another worker's entrypoint.
#[derive(Clone, Debug)]
pub struct ServiceBinding {
    service: String,
    entrypoint: Option<String>,
    fetch: FetchProxy,
    rpc: RpcProxy,
}

impl ServiceBinding {
    pub fn new(
        service: impl Into<String>,
        entrypoint: Option<String>,
        resolver: BindingResolver,
        client: ProxyClient,
    ) -> Self {
        Self {
            service: service.into(),
            entrypoint,
            fetch: FetchProxy::new(resolver.clone(), client.clone()),
            rpc: RpcProxy::new(resolver, client),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub async fn fetch(&self, request: Request) -> Result<Response, ProxyError> {
        self.fetch
            .fetch(&self.service, self.entrypoint.as_deref(), request)
            .await
    }

    pub async fn call(&self, member: &str, args: Vec<Value>) -> Result<Value, ProxyError> {
        self.rpc
            .call(&self.service, self.entrypoint.as_deref(), member, args)
            .await
    }
}

#[derive(Clone, Debug)]
enum Owner {
    /// Class hosted by the calling session itself.
    Local(Arc<DurableObjectHost>),
    Remote {
        script_name: String,
        proxy: DurableObjectProxy,
    },
}

/// Binding to a durable-object class.
#[derive(Clone, Debug)]
pub struct DurableObjectNamespace {
    class_name: String,
    owner: Owner,
}

impl DurableObjectNamespace {
    /// Class hosted by the calling session.
    pub fn local(class_name: impl Into<String>, host: Arc<DurableObjectHost>) -> Self {
        Self {
            class_name: class_name.into(),
            owner: Owner::Local(host),
        }
    }

    /// Class hosted by the session registered as `script_name`.
    pub fn remote(
        class_name: impl Into<String>,
        script_name: impl Into<String>,
        resolver: BindingResolver,
        client: ProxyClient,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            owner: Owner::Remote {
                script_name: script_name.into(),
                proxy: DurableObjectProxy::new(resolver, client),
            },
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn is_local(&self) -> bool {
        matches!(self.owner, Owner::Local(_))
    }

    pub fn get(&self, id: impl Into<String>) -> DurableObjectStub {
        DurableObjectStub {
            namespace: self.clone(),
            id: id.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DurableObjectStub {
    namespace: DurableObjectNamespace,
    id: String,
}

impl DurableObjectStub {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn fetch(&self, request: Request) -> Result<Response, ProxyError> {
        let class_name = &self.namespace.class_name;
        match &self.namespace.owner {
            Owner::Local(host) => Ok(host.fetch(class_name, &self.id, request).await),
            Owner::Remote { script_name, proxy } => {
                proxy.fetch(class_name, script_name, &self.id, request).await
            }
        }
    }

    /// Member access. Works for local classes only; a class owned by another
    /// session always yields `DurableObjectRpcUnsupported`.
    pub async fn call(&self, member: &str, args: Vec<Value>) -> Result<Value, ProxyError> {
        let class_name = &self.namespace.class_name;
        match &self.namespace.owner {
            Owner::Local(host) => host
                .call(class_name, &self.id, member, args)
                .await
                .map_err(ProxyError::Remote),
            Owner::Remote { proxy, .. } => proxy.call(class_name, member),
        }
    }
}
