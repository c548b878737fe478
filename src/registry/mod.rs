//! Session registry shared by every dev session on the machine.

pub mod descriptor;
mod error;
pub mod registrar;
pub mod store;
pub mod watcher;

pub use descriptor::{
    Address, DurableObjectDescriptor, Protocol, SessionDescriptor, SessionMode,
    DEFAULT_ENTRYPOINT,
};
pub use error::RegistryError;
pub use registrar::{BindingTargets, SessionRegistrar};
pub use store::{default_registry_dir, RegistryStore, REGISTRY_PATH_ENV};
pub use watcher::{RegistrySnapshot, RegistryWatcher};
