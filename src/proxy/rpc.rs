use serde_json::Value;
use tracing::instrument;

use super::client::ProxyClient;
use super::error::ProxyError;
use super::wire::RpcCall;
use crate::registry::DEFAULT_ENTRYPOINT;
use crate::resolver::{BindingResolver, Resolution};

/// Member invocation through a service binding.
#[derive(Clone, Debug)]
pub struct RpcProxy {
    resolver: BindingResolver,
    client: ProxyClient,
}

impl RpcProxy {
    pub fn new(resolver: BindingResolver, client: ProxyClient) -> Self {
        Self { resolver, client }
    }

    #[instrument(name = "proxy_rpc", skip(self, args), fields(arg_count = args.len()))]
    pub async fn call(
        &self,
        service: &str,
        entrypoint: Option<&str>,
        member: &str,
        args: Vec<Value>,
    ) -> Result<Value, ProxyError> {
        let entrypoint = entrypoint.unwrap_or(DEFAULT_ENTRYPOINT);

        let Resolution::Found(target) = self.resolver.resolve(service, Some(entrypoint)).await?
        else {
            return Err(ProxyError::RpcTargetNotFound {
                service: service.to_string(),
                entrypoint: entrypoint.to_string(),
                member: member.to_string(),
            });
        };

        let call = RpcCall {
            entrypoint: entrypoint.to_string(),
            member: member.to_string(),
            args,
        };
        self.client.call(&target, &call).await
    }
}
