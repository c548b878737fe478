//! Binding resolution against the registry.
//!
//! Every call re-reads the registry. Nothing is cached, so a session that
//! starts, stops or restarts is picked up by the very next call.

use std::collections::BTreeMap;

use tracing::debug;

use crate::registry::{
    Address, Protocol, RegistryError, RegistryStore, SessionMode, DEFAULT_ENTRYPOINT,
};

/// Where a binding call should be forwarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub worker_name: String,
    pub entrypoint: String,
    pub protocol: Protocol,
    pub mode: SessionMode,
    pub host: String,
    pub port: u16,
    pub headers: BTreeMap<String, String>,
}

impl ResolvedTarget {
    pub fn address(&self) -> Address {
        Address::new(self.host.clone(), self.port)
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol.scheme(), self.address())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Found(ResolvedTarget),
    NotFound,
}

impl Resolution {
    pub fn found(self) -> Option<ResolvedTarget> {
        match self {
            Resolution::Found(target) => Some(target),
            Resolution::NotFound => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BindingResolver {
    store: RegistryStore,
}

impl BindingResolver {
    pub fn new(store: RegistryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// Resolve `entrypoint` (default when `None`) of `worker_name`.
    ///
    /// A record without an entrypoint map and a record that simply lacks the
    /// requested name both resolve to [`Resolution::NotFound`].
    pub async fn resolve(
        &self,
        worker_name: &str,
        entrypoint: Option<&str>,
    ) -> Result<Resolution, RegistryError> {
        let entrypoint = entrypoint.unwrap_or(DEFAULT_ENTRYPOINT);

        let Some(descriptor) = self.store.get(worker_name).await? else {
            debug!(worker = %worker_name, entrypoint, "no registered session");
            return Ok(Resolution::NotFound);
        };

        let Some(address) = descriptor.entrypoint_address(entrypoint) else {
            debug!(worker = %worker_name, entrypoint, "session does not advertise entrypoint");
            return Ok(Resolution::NotFound);
        };

        Ok(Resolution::Found(ResolvedTarget {
            worker_name: descriptor.worker_name,
            entrypoint: entrypoint.to_string(),
            protocol: descriptor.protocol,
            mode: descriptor.mode,
            host: address.host,
            port: address.port,
            headers: descriptor.headers,
        }))
    }

    /// Resolve the durable-object listener of `script_name` for `class_name`.
    pub async fn resolve_durable_object(
        &self,
        class_name: &str,
        script_name: &str,
    ) -> Result<Resolution, RegistryError> {
        let Some(descriptor) = self.store.get(script_name).await? else {
            return Ok(Resolution::NotFound);
        };
        if !descriptor.hosts_durable_object(class_name) {
            debug!(worker = %script_name, class = %class_name, "session does not host class");
            return Ok(Resolution::NotFound);
        }
        let Some(address) = descriptor.durable_object_address() else {
            return Ok(Resolution::NotFound);
        };

        Ok(Resolution::Found(ResolvedTarget {
            worker_name: descriptor.worker_name,
            entrypoint: class_name.to_string(),
            protocol: descriptor.protocol,
            mode: descriptor.mode,
            host: address.host,
            port: address.port,
            headers: descriptor.headers,
        }))
    }
}
