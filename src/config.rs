//! `dev-registry.toml`: how `dev-registry serve` fronts a runtime.
//!
//! ```toml
//! name = "api"
//! upstream = "http://127.0.0.1:9000"
//! tails = ["auth"]
//!
//! [entrypoints.Admin]
//! upstream = "http://127.0.0.1:9001"
//!
//! [[durable_objects]]
//! class_name = "Counter"
//!
//! [[services]]
//! binding = "AUTH"
//! service = "auth"
//!
//! [[durable_object_bindings]]
//! binding = "ROOMS"
//! class_name = "Room"
//! script_name = "chat"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::binding::{DurableObjectNamespace, ServiceBinding};
use crate::proxy::ProxyClient;
use crate::registry::{BindingTargets, RegistryStore, SessionMode, DEFAULT_ENTRYPOINT};
use crate::resolver::BindingResolver;
use crate::session::{
    Gateway, RunningSession, SessionBuilder, UpstreamDurableObjects, UpstreamEntrypoint,
};
use crate::tail::TailSubscription;

pub const CONFIG_FILENAME: &str = "dev-registry.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub name: String,
    /// Runtime address the default entrypoint relays to.
    pub upstream: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub mode: SessionMode,
    #[serde(default)]
    pub entrypoints: BTreeMap<String, EntrypointConfig>,
    #[serde(default)]
    pub durable_objects: Vec<DurableObjectConfig>,
    #[serde(default)]
    pub durable_objects_port: u16,
    #[serde(default)]
    pub services: Vec<ServiceBindingConfig>,
    #[serde(default)]
    pub durable_object_bindings: Vec<DurableObjectBindingConfig>,
    /// Workers whose tail events this session consumes.
    #[serde(default)]
    pub tails: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    #[serde(default)]
    pub gateway_port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntrypointConfig {
    #[serde(default)]
    pub upstream: Option<String>,
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableObjectConfig {
    pub class_name: String,
    #[serde(default)]
    pub upstream: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceBindingConfig {
    pub binding: String,
    pub service: String,
    #[serde(default)]
    pub entrypoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableObjectBindingConfig {
    pub binding: String,
    pub class_name: String,
    /// Owning worker; this session when absent.
    #[serde(default)]
    pub script_name: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl SessionConfig {
    pub fn load() -> Result<Self> {
        load_config_from_path(CONFIG_FILENAME)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("name must not be empty");
        }
        validate_url("upstream", &self.upstream)?;

        for (name, entrypoint) in &self.entrypoints {
            if name == DEFAULT_ENTRYPOINT {
                bail!("entrypoint '{}' is implicit; configure it at the top level", name);
            }
            if let Some(upstream) = &entrypoint.upstream {
                validate_url(&format!("entrypoints.{}.upstream", name), upstream)?;
            }
        }

        let mut classes = HashSet::new();
        for object in &self.durable_objects {
            if !classes.insert(object.class_name.as_str()) {
                bail!("durable object class '{}' is listed twice", object.class_name);
            }
            if let Some(upstream) = &object.upstream {
                validate_url(&format!("durable_objects.{}.upstream", object.class_name), upstream)?;
            }
        }

        let mut bindings = HashSet::new();
        let names = self
            .services
            .iter()
            .map(|s| &s.binding)
            .chain(self.durable_object_bindings.iter().map(|d| &d.binding));
        for name in names {
            if !bindings.insert(name.as_str()) {
                bail!("binding '{}' is declared twice", name);
            }
        }

        for binding in &self.durable_object_bindings {
            if self.is_local(binding) && !classes.contains(binding.class_name.as_str()) {
                bail!(
                    "binding '{}' refers to class '{}', which this session does not host",
                    binding.binding,
                    binding.class_name
                );
            }
        }
        Ok(())
    }

    /// Registry to use: `override_dir`, then `registry_path`, then the default.
    pub fn registry_store(&self, override_dir: Option<&Path>) -> Result<RegistryStore> {
        if let Some(dir) = override_dir {
            return Ok(RegistryStore::new(dir));
        }
        if let Some(dir) = &self.registry_path {
            return Ok(RegistryStore::new(dir));
        }
        Ok(RegistryStore::from_env()?)
    }

    /// Other workers this session depends on.
    pub fn binding_targets(&self) -> BindingTargets {
        BindingTargets {
            services: self.services.iter().map(|s| s.service.clone()).collect(),
            durable_object_scripts: self
                .durable_object_bindings
                .iter()
                .filter(|d| !self.is_local(d))
                .filter_map(|d| d.script_name.clone())
                .collect(),
        }
    }

    /// Session relaying every entrypoint and durable object to the runtime.
    pub fn session_builder(&self, client: &ProxyClient) -> SessionBuilder {
        let mut builder = SessionBuilder::new(self.name.clone())
            .host(self.host.clone())
            .port(self.port)
            .mode(self.mode)
            .durable_objects_port(self.durable_objects_port)
            .default_entrypoint(Arc::new(UpstreamEntrypoint::new(
                self.name.clone(),
                DEFAULT_ENTRYPOINT,
                self.upstream.clone(),
                client.clone(),
            )));

        for (name, entrypoint) in &self.entrypoints {
            let upstream = entrypoint
                .upstream
                .clone()
                .unwrap_or_else(|| self.upstream.clone());
            builder = builder.entrypoint(
                name.clone(),
                entrypoint.port,
                Arc::new(UpstreamEntrypoint::new(
                    self.name.clone(),
                    name.clone(),
                    upstream,
                    client.clone(),
                )),
            );
        }

        for object in &self.durable_objects {
            let upstream = object
                .upstream
                .clone()
                .unwrap_or_else(|| self.upstream.clone());
            builder = builder.durable_object(Arc::new(UpstreamDurableObjects::new(
                self.name.clone(),
                object.class_name.clone(),
                upstream,
                client.clone(),
            )));
        }

        for (name, value) in &self.headers {
            builder = builder.header(name.clone(), value.clone());
        }
        builder
    }

    /// Gateway exposing the configured bindings to the runtime, and taking
    /// its tail events into `session`'s queue.
    pub fn gateway(
        &self,
        resolver: &BindingResolver,
        client: &ProxyClient,
        session: &RunningSession,
    ) -> Gateway {
        let local_objects = session.durable_object_host();
        let mut gateway = Gateway::new().tail_events(session.worker_name(), session.tail());

        for service in &self.services {
            gateway = gateway.service(
                service.binding.clone(),
                ServiceBinding::new(
                    service.service.clone(),
                    service.entrypoint.clone(),
                    resolver.clone(),
                    client.clone(),
                ),
            );
        }

        for binding in &self.durable_object_bindings {
            let namespace = match &binding.script_name {
                Some(script) if !self.is_local(binding) => DurableObjectNamespace::remote(
                    binding.class_name.clone(),
                    script.clone(),
                    resolver.clone(),
                    client.clone(),
                ),
                _ => DurableObjectNamespace::local(binding.class_name.clone(), local_objects.clone()),
            };
            gateway = gateway.durable_object(binding.binding.clone(), namespace);
        }

        if !self.tails.is_empty() {
            gateway = gateway.tails(TailSubscription::new(
                resolver.clone(),
                client.clone(),
                self.tails.clone(),
            ));
        }
        gateway
    }

    fn is_local(&self, binding: &DurableObjectBindingConfig) -> bool {
        binding
            .script_name
            .as_deref()
            .map_or(true, |script| script == self.name)
    }
}

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<SessionConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let config: SessionConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;
    Ok(config)
}

fn validate_url(field: &str, url: &str) -> Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{} must be an http:// or https:// URL, got '{}'", field, url);
    }
    Ok(())
}
