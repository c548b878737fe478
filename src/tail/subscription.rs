use tracing::{debug, warn};

use super::queue::TailEvent;
use crate::proxy::{ProxyClient, ProxyError};
use crate::resolver::{BindingResolver, Resolution};

/// Consumer side of the tail relationship: polls producers declared at startup.
#[derive(Clone, Debug)]
pub struct TailSubscription {
    resolver: BindingResolver,
    client: ProxyClient,
    producers: Vec<String>,
}

impl TailSubscription {
    pub fn new(resolver: BindingResolver, client: ProxyClient, producers: Vec<String>) -> Self {
        Self {
            resolver,
            client,
            producers,
        }
    }

    pub fn producers(&self) -> &[String] {
        &self.producers
    }

    /// Drain `worker`'s queue in its own session. An unregistered producer has
    /// nothing to give and yields an empty batch.
    pub async fn drain(&self, worker: &str) -> Result<Vec<TailEvent>, ProxyError> {
        match self.resolver.resolve(worker, None).await? {
            Resolution::Found(target) => self.client.drain_tail(&target).await,
            Resolution::NotFound => {
                debug!(worker, "tail producer not registered");
                Ok(Vec::new())
            }
        }
    }

    /// Drain every producer once. A producer that cannot be reached is logged
    /// and skipped; the rest are still drained.
    pub async fn poll(&self) -> Vec<TailEvent> {
        let mut events = Vec::new();
        for worker in &self.producers {
            match self.drain(worker).await {
                Ok(batch) => events.extend(batch),
                Err(e) => warn!(worker = %worker, error = %e, "tail drain failed"),
            }
        }
        events
    }
}
