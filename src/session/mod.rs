//! In-process side of a dev session: listeners, handlers and the runtime gateway.

mod durable_objects;
mod entrypoint;
pub mod gateway;
pub mod router;
mod runner;
mod upstream;

pub use durable_objects::{DurableObject, DurableObjectClass, DurableObjectHost};
pub use entrypoint::{missing_member, Entrypoint};
pub use gateway::{Gateway, RunningGateway};
pub use runner::{RunningSession, SessionBuilder, SessionError};
pub use upstream::{UpstreamDurableObjects, UpstreamEntrypoint};
