//! Wire contract between dev sessions.
//!
//! Everything rides on plain HTTP. Reserved `x-dev-registry-*` headers carry
//! provenance metadata, the caller's original URL and the operation marker
//! that separates RPC calls and tail drains from ordinary fetches.

use axum::http::{HeaderMap, HeaderName};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CF_BLOB_HEADER: &str = "x-dev-registry-cf-blob";
pub const ORIGINAL_URL_HEADER: &str = "x-dev-registry-original-url";
pub const OP_HEADER: &str = "x-dev-registry-op";
pub const ERROR_HEADER: &str = "x-dev-registry-error";
pub const DO_CLASS_HEADER: &str = "x-dev-registry-do-class";
pub const DO_ID_HEADER: &str = "x-dev-registry-do-id";
/// Gateway only: names the service binding a runtime request goes through.
pub const BINDING_HEADER: &str = "x-dev-registry-binding";
/// Gateway only: names the durable-object binding a runtime request goes through.
pub const DO_BINDING_HEADER: &str = "x-dev-registry-do-binding";

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "host",
];

/// Non-fetch operation carried by a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Call,
    TailDrain,
    /// Runtime to gateway: a JSON array of payloads emitted by one invocation.
    TailPublish,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Call => "call",
            Op::TailDrain => "tail-drain",
            Op::TailPublish => "tail-publish",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "call" => Some(Op::Call),
            "tail-drain" => Some(Op::TailDrain),
            "tail-publish" => Some(Op::TailPublish),
            _ => None,
        }
    }
}

/// Operation marker on `headers`: `Ok(None)` for a plain fetch, `Err` with the
/// raw value when the marker is present but unknown.
pub fn op_of(headers: &HeaderMap) -> Result<Option<Op>, String> {
    match headers.get(OP_HEADER) {
        None => Ok(None),
        Some(value) => {
            let raw = value.to_str().unwrap_or_default();
            Op::parse(raw).map(Some).ok_or_else(|| raw.to_string())
        }
    }
}

/// Provenance metadata of the request that started a call chain.
///
/// Lives in request extensions inside a session and in [`CF_BLOB_HEADER`]
/// between sessions. The value is opaque to the proxy.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestMetadata(pub Value);

impl RequestMetadata {
    pub fn encode(&self) -> String {
        STANDARD.encode(self.0.to_string())
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let bytes = STANDARD.decode(raw.trim()).ok()?;
        serde_json::from_slice(&bytes).ok().map(RequestMetadata)
    }
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    let name = name.as_str();
    HOP_BY_HOP.contains(&name) || name.starts_with("proxy-")
}

/// Copy of `headers` without hop-by-hop entries.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Member invocation sent with `op: call`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    pub entrypoint: String,
    pub member: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Body of a successful `op: call` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcResult {
    pub result: Value,
}

/// Serialized thrown error; travels as a 500 with [`ERROR_HEADER`] set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}
