use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::wire::{RemoteError, ERROR_HEADER};
use crate::registry::RegistryError;

/// Failure of a proxied binding call.
#[derive(Debug)]
pub enum ProxyError {
    /// Fetch to a service or entrypoint that no running session advertises.
    ServiceNotFound { service: String, entrypoint: String },
    /// RPC to a service or entrypoint that no running session advertises.
    RpcTargetNotFound {
        service: String,
        entrypoint: String,
        member: String,
    },
    DurableObjectNotFound {
        class_name: String,
        script_name: String,
    },
    /// RPC against a durable object hosted by another session. Never succeeds.
    DurableObjectRpcUnsupported { class_name: String, member: String },
    /// A registered target could not be reached (usually a crashed session).
    Transport {
        worker: String,
        url: String,
        source: reqwest::Error,
    },
    /// The target threw.
    Remote(RemoteError),
    /// The target answered with something the wire contract does not allow.
    Protocol(String),
    Registry(RegistryError),
}

impl ProxyError {
    /// True when the target never started, as opposed to having crashed.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            ProxyError::ServiceNotFound { .. }
                | ProxyError::RpcTargetNotFound { .. }
                | ProxyError::DurableObjectNotFound { .. }
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ServiceNotFound { .. } | ProxyError::DurableObjectNotFound { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::Transport { .. } | ProxyError::Protocol(_) => StatusCode::BAD_GATEWAY,
            ProxyError::RpcTargetNotFound { .. }
            | ProxyError::DurableObjectRpcUnsupported { .. }
            | ProxyError::Remote(_)
            | ProxyError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The error as it is thrown to an RPC caller.
    pub fn to_remote_error(&self) -> RemoteError {
        match self {
            ProxyError::Remote(remote) => remote.clone(),
            other => RemoteError::new(other.to_string()),
        }
    }

    /// RPC-shaped response: 500, error marker, serialized [`RemoteError`].
    pub fn into_rpc_response(self) -> Response {
        rpc_error_response(&self.to_remote_error())
    }
}

pub fn rpc_error_response(error: &RemoteError) -> Response {
    let mut response = (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response();
    response
        .headers_mut()
        .insert(ERROR_HEADER, HeaderValue::from_static("true"));
    response
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyError::ServiceNotFound {
                service,
                entrypoint,
            } => write!(
                f,
                "Couldn't find a local dev session for the \"{}\" entrypoint of service \"{}\" to proxy to",
                entrypoint, service
            ),
            ProxyError::RpcTargetNotFound {
                service,
                entrypoint,
                member,
            } => write!(
                f,
                "Cannot access \"{}\" as we couldn't find a local dev session for the \"{}\" entrypoint of service \"{}\" to proxy to.",
                member, entrypoint, service
            ),
            ProxyError::DurableObjectNotFound { .. } => write!(f, "Service Unavailable"),
            ProxyError::DurableObjectRpcUnsupported { class_name, member } => write!(
                f,
                "Cannot access \"{}#{}\" as Durable Object RPC is not yet supported between multiple dev sessions.",
                class_name, member
            ),
            ProxyError::Transport {
                worker,
                url,
                source,
            } => write!(f, "failed to reach \"{}\" at {}: {}", worker, url, source),
            ProxyError::Remote(remote) => write!(f, "{}", remote),
            ProxyError::Protocol(msg) => write!(f, "unexpected response from target: {}", msg),
            ProxyError::Registry(e) => write!(f, "registry error: {}", e),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Transport { source, .. } => Some(source),
            ProxyError::Remote(remote) => Some(remote),
            ProxyError::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegistryError> for ProxyError {
    fn from(e: RegistryError) -> Self {
        ProxyError::Registry(e)
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::RpcTargetNotFound { .. }
            | ProxyError::DurableObjectRpcUnsupported { .. }
            | ProxyError::Remote(_) => self.into_rpc_response(),
            other => (other.status(), other.to_string()).into_response(),
        }
    }
}
