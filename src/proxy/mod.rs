//! Forwarding of binding calls to other sessions.

mod client;
mod durable_object;
mod error;
mod fetch;
mod rpc;
pub mod wire;

pub use client::ProxyClient;
pub use durable_object::DurableObjectProxy;
pub use error::{rpc_error_response, ProxyError};
pub use fetch::FetchProxy;
pub use rpc::RpcProxy;
pub use wire::{RemoteError, RequestMetadata, RpcCall};
