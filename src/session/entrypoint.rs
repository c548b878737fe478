use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use serde_json::Value;

use crate::proxy::RemoteError;

/// Error thrown for a member the receiver does not have.
pub fn missing_member(member: &str) -> RemoteError {
    RemoteError::new(format!(
        "The RPC receiver does not implement the method \"{}\".",
        member
    ))
    .with_name("TypeError")
}

/// Handler behind one entrypoint of a session.
///
/// Requests reach `fetch` with the caller's original URL and any
/// [`RequestMetadata`](crate::proxy::RequestMetadata) already restored.
#[async_trait]
pub trait Entrypoint: Send + Sync + 'static {
    async fn fetch(&self, request: Request) -> Response;

    async fn call(&self, member: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        let _ = args;
        Err(missing_member(member))
    }
}
