//! SessionRegistrar: owns one session's registry entry for its lifetime.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::descriptor::SessionDescriptor;
use super::error::RegistryError;
use super::store::RegistryStore;

/// How often a registered session refreshes its entry's modification time.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Workers a session depends on, used to find which of them are running.
#[derive(Clone, Debug, Default)]
pub struct BindingTargets {
    pub services: Vec<String>,
    pub durable_object_scripts: Vec<String>,
}

impl BindingTargets {
    fn names(&self) -> impl Iterator<Item = &String> {
        self.services.iter().chain(self.durable_object_scripts.iter())
    }
}

pub struct SessionRegistrar {
    store: RegistryStore,
    descriptor: SessionDescriptor,
    heartbeat_interval: Duration,
    heartbeat: Option<JoinHandle<()>>,
}

impl SessionRegistrar {
    pub fn new(store: RegistryStore, descriptor: SessionDescriptor) -> Self {
        Self {
            store,
            descriptor,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat: None,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn worker_name(&self) -> &str {
        &self.descriptor.worker_name
    }

    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    pub fn is_registered(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Write this session's descriptor and start heartbeating it.
    pub async fn register(&mut self) -> Result<(), RegistryError> {
        self.descriptor.registered_at = Some(chrono::Utc::now().timestamp_millis());
        self.store.register(&self.descriptor).await?;

        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        self.heartbeat = Some(spawn_heartbeat(
            self.store.clone(),
            self.descriptor.clone(),
            self.heartbeat_interval,
        ));

        info!(
            worker = %self.descriptor.worker_name,
            protocol = %self.descriptor.protocol,
            host = %self.descriptor.host,
            port = self.descriptor.port,
            "session registered"
        );
        Ok(())
    }

    /// Replace the descriptor (a restart) and re-register.
    pub async fn update(&mut self, descriptor: SessionDescriptor) -> Result<(), RegistryError> {
        if descriptor.worker_name != self.descriptor.worker_name {
            // a rename is a different key; release the old one first
            self.unregister().await?;
        }
        self.descriptor = descriptor;
        self.register().await
    }

    /// Stop heartbeating and remove the entry. Safe to call repeatedly.
    pub async fn unregister(&mut self) -> Result<(), RegistryError> {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        self.store.unregister(&self.descriptor.worker_name).await?;
        info!(worker = %self.descriptor.worker_name, "session unregistered");
        Ok(())
    }

    /// Registered descriptors for the workers this session binds to, excluding itself.
    pub async fn bound_sessions(
        &self,
        targets: &BindingTargets,
    ) -> Result<BTreeMap<String, SessionDescriptor>, RegistryError> {
        let mut bound = BTreeMap::new();
        for name in targets.names() {
            if name == &self.descriptor.worker_name || bound.contains_key(name) {
                continue;
            }
            if let Some(descriptor) = self.store.get(name).await? {
                bound.insert(name.clone(), descriptor);
            }
        }
        Ok(bound)
    }
}

impl Drop for SessionRegistrar {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

fn spawn_heartbeat(
    store: RegistryStore,
    descriptor: SessionDescriptor,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately; the entry was just written
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.touch(&descriptor.worker_name).await {
                Ok(()) => debug!(worker = %descriptor.worker_name, "registry heartbeat"),
                Err(RegistryError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                    warn!(
                        worker = %descriptor.worker_name,
                        "registry entry disappeared, writing it again"
                    );
                    if let Err(e) = store.register(&descriptor).await {
                        warn!(worker = %descriptor.worker_name, error = %e, "re-registration failed");
                    }
                }
                Err(e) => {
                    warn!(worker = %descriptor.worker_name, error = %e, "registry heartbeat failed")
                }
            }
        }
    })
}
