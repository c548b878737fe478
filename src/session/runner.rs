//! Session lifecycle: bind listeners, register, serve, unregister.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::durable_objects::{DurableObjectClass, DurableObjectHost};
use super::entrypoint::Entrypoint;
use super::router::{durable_object_router, entrypoint_router};
use crate::registry::{
    Address, BindingTargets, DurableObjectDescriptor, RegistryError, RegistryStore,
    SessionDescriptor, SessionMode, SessionRegistrar, DEFAULT_ENTRYPOINT,
};
use crate::tail::TailFanout;

#[derive(Debug)]
pub enum SessionError {
    Bind {
        addr: String,
        source: std::io::Error,
    },
    MissingDefaultEntrypoint,
    Registry(RegistryError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Bind { addr, source } => write!(f, "failed to bind {}: {}", addr, source),
            SessionError::MissingDefaultEntrypoint => {
                write!(f, "a session needs a default entrypoint")
            }
            SessionError::Registry(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Bind { source, .. } => Some(source),
            SessionError::Registry(e) => Some(e),
            SessionError::MissingDefaultEntrypoint => None,
        }
    }
}

impl From<RegistryError> for SessionError {
    fn from(e: RegistryError) -> Self {
        SessionError::Registry(e)
    }
}

struct NamedEntrypoint {
    name: String,
    port: u16,
    handler: Arc<dyn Entrypoint>,
}

/// Describes a session before it starts.
///
/// The durable-object host and tail queues exist before `start`, so handlers
/// can be built around them.
pub struct SessionBuilder {
    worker_name: String,
    host: String,
    port: u16,
    mode: SessionMode,
    default_entrypoint: Option<Arc<dyn Entrypoint>>,
    entrypoints: Vec<NamedEntrypoint>,
    durable_objects: Arc<DurableObjectHost>,
    durable_objects_port: u16,
    tail: Arc<TailFanout>,
    headers: BTreeMap<String, String>,
    heartbeat_interval: Option<Duration>,
}

impl SessionBuilder {
    pub fn new(worker_name: impl Into<String>) -> Self {
        Self {
            worker_name: worker_name.into(),
            host: "127.0.0.1".to_string(),
            port: 0,
            mode: SessionMode::Local,
            default_entrypoint: None,
            entrypoints: Vec::new(),
            durable_objects: Arc::new(DurableObjectHost::new()),
            durable_objects_port: 0,
            tail: Arc::new(TailFanout::new()),
            headers: BTreeMap::new(),
            heartbeat_interval: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Port of the default entrypoint; 0 picks a free one.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn default_entrypoint(mut self, handler: Arc<dyn Entrypoint>) -> Self {
        self.default_entrypoint = Some(handler);
        self
    }

    pub fn entrypoint(
        mut self,
        name: impl Into<String>,
        port: u16,
        handler: Arc<dyn Entrypoint>,
    ) -> Self {
        self.entrypoints.push(NamedEntrypoint {
            name: name.into(),
            port,
            handler,
        });
        self
    }

    pub fn durable_object(self, class: Arc<dyn DurableObjectClass>) -> Self {
        self.durable_objects.register_class(class);
        self
    }

    pub fn durable_objects_port(mut self, port: u16) -> Self {
        self.durable_objects_port = port;
        self
    }

    /// Header added by callers to every request they forward here.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    pub fn durable_object_host(&self) -> Arc<DurableObjectHost> {
        self.durable_objects.clone()
    }

    pub fn tail(&self) -> Arc<TailFanout> {
        self.tail.clone()
    }

    /// Bind every listener, register, then start serving.
    ///
    /// The descriptor is in the registry before any listener accepts a
    /// connection, so nothing this session serves can fail to resolve it.
    pub async fn start(self, store: RegistryStore) -> Result<RunningSession, SessionError> {
        let default_handler = self
            .default_entrypoint
            .ok_or(SessionError::MissingDefaultEntrypoint)?;

        let default_listener = bind(&self.host, self.port).await?;
        let default_addr = local_address(&self.host, &default_listener)?;

        let mut descriptor = SessionDescriptor::new(
            self.worker_name.clone(),
            default_addr.host.clone(),
            default_addr.port,
        )
        .with_mode(self.mode)
        .with_entrypoint(DEFAULT_ENTRYPOINT, default_addr.clone());
        descriptor.headers = self.headers;

        let mut routers = vec![(
            default_listener,
            entrypoint_router(
                &self.worker_name,
                DEFAULT_ENTRYPOINT,
                default_handler,
                self.tail.clone(),
            ),
        )];

        for named in self.entrypoints {
            let listener = bind(&self.host, named.port).await?;
            let address = local_address(&self.host, &listener)?;
            descriptor = descriptor.with_entrypoint(named.name.clone(), address);
            routers.push((
                listener,
                entrypoint_router(
                    &self.worker_name,
                    &named.name,
                    named.handler,
                    self.tail.clone(),
                ),
            ));
        }

        if !self.durable_objects.is_empty() {
            let listener = bind(&self.host, self.durable_objects_port).await?;
            let address = local_address(&self.host, &listener)?;
            let classes = self
                .durable_objects
                .class_names()
                .into_iter()
                .map(DurableObjectDescriptor::new);
            descriptor = descriptor.with_durable_objects(address, classes);
            routers.push((listener, durable_object_router(self.durable_objects.clone())));
        }

        let mut registrar = SessionRegistrar::new(store, descriptor);
        if let Some(interval) = self.heartbeat_interval {
            registrar = registrar.with_heartbeat_interval(interval);
        }
        registrar.register().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let servers = routers
            .into_iter()
            .map(|(listener, router)| serve(listener, router, shutdown_rx.clone()))
            .collect();

        info!(
            worker = %self.worker_name,
            url = %registrar.descriptor().base_url(&default_addr),
            "session started"
        );

        Ok(RunningSession {
            registrar,
            shutdown: shutdown_tx,
            servers,
            durable_objects: self.durable_objects,
            tail: self.tail,
        })
    }
}

/// A started session. Call [`RunningSession::stop`] to leave the registry
/// cleanly; dropping it leaves a stale entry behind, like a crash would.
pub struct RunningSession {
    registrar: SessionRegistrar,
    shutdown: watch::Sender<bool>,
    servers: Vec<JoinHandle<()>>,
    durable_objects: Arc<DurableObjectHost>,
    tail: Arc<TailFanout>,
}

impl RunningSession {
    pub fn worker_name(&self) -> &str {
        self.registrar.worker_name()
    }

    pub fn descriptor(&self) -> &SessionDescriptor {
        self.registrar.descriptor()
    }

    /// Base URL of an entrypoint listener.
    pub fn url(&self, entrypoint: &str) -> Option<String> {
        let descriptor = self.descriptor();
        descriptor
            .entrypoint_address(entrypoint)
            .map(|address| descriptor.base_url(&address))
    }

    pub fn durable_object_host(&self) -> Arc<DurableObjectHost> {
        self.durable_objects.clone()
    }

    pub fn tail(&self) -> Arc<TailFanout> {
        self.tail.clone()
    }

    /// Registered sessions among this session's dependencies.
    pub async fn bound_sessions(
        &self,
        targets: &BindingTargets,
    ) -> Result<BTreeMap<String, SessionDescriptor>, RegistryError> {
        self.registrar.bound_sessions(targets).await
    }

    /// Unregister, then stop accepting connections and wait for the servers.
    pub async fn stop(mut self) -> Result<(), RegistryError> {
        let unregistered = self.registrar.unregister().await;
        let _ = self.shutdown.send(true);
        for server in self.servers.drain(..) {
            let _ = server.await;
        }
        info!(worker = %self.registrar.worker_name(), "session stopped");
        unregistered
    }
}

impl Drop for RunningSession {
    fn drop(&mut self) {
        for server in &self.servers {
            server.abort();
        }
    }
}

async fn bind(host: &str, port: u16) -> Result<TcpListener, SessionError> {
    TcpListener::bind((host, port))
        .await
        .map_err(|source| SessionError::Bind {
            addr: Address::new(host, port).to_string(),
            source,
        })
}

fn local_address(host: &str, listener: &TcpListener) -> Result<Address, SessionError> {
    let addr: SocketAddr = listener.local_addr().map_err(|source| SessionError::Bind {
        addr: host.to_string(),
        source,
    })?;
    Ok(Address::new(host, addr.port()))
}

pub(crate) fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        });
        if let Err(err) = server.await {
            error!(error = %err, "session listener failed");
        }
    })
}
