//! Session descriptor: the record each running dev session writes into the registry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the implicit entrypoint every session exposes.
pub const DEFAULT_ENTRYPOINT: &str = "default";

/// Transport a session listens on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Whether a session runs the worker locally or relays to a deployed instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    Local,
    Remote,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Local => f.write_str("local"),
            SessionMode::Remote => f.write_str("remote"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Bare IPv6 literals need brackets inside a URL authority
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A durable-object class hosted by a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableObjectDescriptor {
    pub class_name: String,
    /// Binding name inside the owning session, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DurableObjectDescriptor {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            name: None,
        }
    }
}

/// Registry record describing how to reach a running session.
///
/// `entrypoint_addresses` is deliberately an `Option`: a record written
/// without the key comes from a session that only understands the default
/// entrypoint, while `Some(empty)` means the session advertised that it has
/// no named entrypoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub worker_name: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub mode: SessionMode,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint_addresses: Option<BTreeMap<String, Address>>,
    #[serde(default)]
    pub durable_objects: Vec<DurableObjectDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable_objects_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable_objects_port: Option<u16>,
    /// Extra headers added to every request forwarded to this session.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_registry_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<i64>,
}

impl SessionDescriptor {
    /// A descriptor with only a default address and an empty entrypoint map.
    pub fn new(worker_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            worker_name: worker_name.into(),
            protocol: Protocol::Http,
            mode: SessionMode::Local,
            host: host.into(),
            port,
            entrypoint_addresses: Some(BTreeMap::new()),
            durable_objects: Vec::new(),
            durable_objects_host: None,
            durable_objects_port: None,
            headers: BTreeMap::new(),
            dev_registry_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            registered_at: None,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_entrypoint(mut self, name: impl Into<String>, address: Address) -> Self {
        self.entrypoint_addresses
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), address);
        self
    }

    /// Drop the entrypoint map entirely, producing a legacy-shaped record.
    pub fn without_entrypoints(mut self) -> Self {
        self.entrypoint_addresses = None;
        self
    }

    pub fn with_durable_objects(
        mut self,
        address: Address,
        classes: impl IntoIterator<Item = DurableObjectDescriptor>,
    ) -> Self {
        self.durable_objects_host = Some(address.host);
        self.durable_objects_port = Some(address.port);
        self.durable_objects = classes.into_iter().collect();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn default_address(&self) -> Address {
        Address::new(self.host.clone(), self.port)
    }

    /// Address serving `entrypoint`, if this session advertises it.
    ///
    /// `default` always resolves: to its entry in the map when present,
    /// otherwise to `host`/`port`. Any other name needs an entry in the map;
    /// a record without the map supports nothing but `default`.
    pub fn entrypoint_address(&self, entrypoint: &str) -> Option<Address> {
        let advertised = self
            .entrypoint_addresses
            .as_ref()
            .and_then(|map| map.get(entrypoint))
            .cloned();

        if entrypoint == DEFAULT_ENTRYPOINT {
            Some(advertised.unwrap_or_else(|| self.default_address()))
        } else {
            advertised
        }
    }

    pub fn hosts_durable_object(&self, class_name: &str) -> bool {
        self.durable_objects
            .iter()
            .any(|d| d.class_name == class_name)
    }

    pub fn durable_object_address(&self) -> Option<Address> {
        match (&self.durable_objects_host, self.durable_objects_port) {
            (Some(host), Some(port)) => Some(Address::new(host.clone(), port)),
            _ => None,
        }
    }

    pub fn base_url(&self, address: &Address) -> String {
        format!("{}://{}", self.protocol.scheme(), address)
    }
}
