// src/lib.rs
//! Service discovery and binding proxy for local Workers dev sessions.
//!
//! Each session writes a descriptor into a shared registry directory. Service
//! bindings, RPC, durable-object stubs and tail subscriptions resolve their
//! target from that directory on every call and forward over loopback HTTP.

pub mod binding;
pub mod cli;
pub mod config;
pub mod logging;
pub mod proxy;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod tail;

pub use binding::{DurableObjectNamespace, DurableObjectStub, ServiceBinding};
pub use proxy::{
    DurableObjectProxy, FetchProxy, ProxyClient, ProxyError, RemoteError, RequestMetadata,
    RpcCall, RpcProxy,
};
pub use registry::{RegistryStore, SessionDescriptor, SessionRegistrar};
pub use resolver::{BindingResolver, Resolution, ResolvedTarget};
pub use session::{Entrypoint, RunningSession, SessionBuilder};
pub use tail::{TailEvent, TailFanout, TailSubscription};

// Re-export tracing for use in other modules
pub use tracing;
