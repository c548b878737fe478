use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use tracing::{debug, instrument};

use super::client::ProxyClient;
use super::error::ProxyError;
use crate::registry::DEFAULT_ENTRYPOINT;
use crate::resolver::{BindingResolver, Resolution};

/// Fetch through a service binding.
#[derive(Clone, Debug)]
pub struct FetchProxy {
    resolver: BindingResolver,
    client: ProxyClient,
}

impl FetchProxy {
    pub fn new(resolver: BindingResolver, client: ProxyClient) -> Self {
        Self { resolver, client }
    }

    /// Resolve `service`/`entrypoint` now and forward `request` to it.
    ///
    /// An unresolved target is not an error here: the caller gets the 503
    /// response a production binding would never produce, with a message
    /// naming what is missing. Only transport and registry failures are `Err`.
    #[instrument(name = "proxy_fetch", skip(self, request), fields(method = %request.method()))]
    pub async fn fetch(
        &self,
        service: &str,
        entrypoint: Option<&str>,
        request: Request,
    ) -> Result<Response, ProxyError> {
        let entrypoint = entrypoint.unwrap_or(DEFAULT_ENTRYPOINT);

        match self.resolver.resolve(service, Some(entrypoint)).await? {
            Resolution::Found(target) => self.client.forward(&target, request).await,
            Resolution::NotFound => {
                debug!(service, entrypoint, "fetch target not registered");
                Ok(ProxyError::ServiceNotFound {
                    service: service.to_string(),
                    entrypoint: entrypoint.to_string(),
                }
                .into_response())
            }
        }
    }
}
