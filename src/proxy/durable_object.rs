use axum::extract::Request;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use tracing::{debug, instrument};

use super::client::ProxyClient;
use super::error::ProxyError;
use super::wire::{DO_CLASS_HEADER, DO_ID_HEADER};
use crate::resolver::{BindingResolver, Resolution};

/// Access to durable objects hosted by another session.
///
/// Only `fetch` crosses sessions. Member access always fails, whether or not
/// the owning session is running.
#[derive(Clone, Debug)]
pub struct DurableObjectProxy {
    resolver: BindingResolver,
    client: ProxyClient,
}

impl DurableObjectProxy {
    pub fn new(resolver: BindingResolver, client: ProxyClient) -> Self {
        Self { resolver, client }
    }

    #[instrument(name = "proxy_do_fetch", skip(self, request))]
    pub async fn fetch(
        &self,
        class_name: &str,
        script_name: &str,
        object_id: &str,
        mut request: Request,
    ) -> Result<Response, ProxyError> {
        let target = match self
            .resolver
            .resolve_durable_object(class_name, script_name)
            .await?
        {
            Resolution::Found(target) => target,
            Resolution::NotFound => {
                debug!(class = %class_name, worker = %script_name, "durable object owner not registered");
                return Ok(ProxyError::DurableObjectNotFound {
                    class_name: class_name.to_string(),
                    script_name: script_name.to_string(),
                }
                .into_response());
            }
        };

        let class = HeaderValue::from_str(class_name)
            .map_err(|_| ProxyError::Protocol(format!("invalid class name {:?}", class_name)))?;
        let id = HeaderValue::from_str(object_id)
            .map_err(|_| ProxyError::Protocol(format!("invalid object id {:?}", object_id)))?;
        request.headers_mut().insert(DO_CLASS_HEADER, class);
        request.headers_mut().insert(DO_ID_HEADER, id);

        self.client.forward(&target, request).await
    }

    /// Always `DurableObjectRpcUnsupported`; no lookup is made.
    pub fn call(&self, class_name: &str, member: &str) -> Result<serde_json::Value, ProxyError> {
        Err(ProxyError::DurableObjectRpcUnsupported {
            class_name: class_name.to_string(),
            member: member.to_string(),
        })
    }
}
