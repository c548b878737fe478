//! Durable objects hosted by this session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::debug;

use super::entrypoint::missing_member;
use crate::proxy::RemoteError;

/// One live durable-object instance.
#[async_trait]
pub trait DurableObject: Send + Sync + 'static {
    async fn fetch(&self, request: Request) -> Response;

    async fn call(&self, member: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        let _ = args;
        Err(missing_member(member))
    }
}

/// Factory for instances of one class.
pub trait DurableObjectClass: Send + Sync + 'static {
    fn class_name(&self) -> &str;

    fn instantiate(&self, id: &str) -> Arc<dyn DurableObject>;
}

type InstanceKey = (String, String);

/// Hosted classes and their instances, created on first use per id.
#[derive(Default)]
pub struct DurableObjectHost {
    classes: Mutex<HashMap<String, Arc<dyn DurableObjectClass>>>,
    instances: Mutex<HashMap<InstanceKey, Arc<dyn DurableObject>>>,
}

impl std::fmt::Debug for DurableObjectHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableObjectHost")
            .field("classes", &self.class_names())
            .finish()
    }
}

impl DurableObjectHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_class(&self, class: Arc<dyn DurableObjectClass>) {
        let name = class.class_name().to_string();
        lock(&self.classes).insert(name, class);
    }

    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.classes).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.classes).is_empty()
    }

    pub fn hosts(&self, class_name: &str) -> bool {
        lock(&self.classes).contains_key(class_name)
    }

    /// The instance for `(class_name, id)`, creating it if needed.
    pub fn get(&self, class_name: &str, id: &str) -> Option<Arc<dyn DurableObject>> {
        let class = lock(&self.classes).get(class_name).cloned()?;
        let key = (class_name.to_string(), id.to_string());
        let instance = lock(&self.instances)
            .entry(key)
            .or_insert_with(|| {
                debug!(class = %class_name, id, "creating durable object instance");
                class.instantiate(id)
            })
            .clone();
        Some(instance)
    }

    pub async fn fetch(&self, class_name: &str, id: &str, request: Request) -> Response {
        match self.get(class_name, id) {
            Some(instance) => instance.fetch(request).await,
            None => (
                StatusCode::NOT_FOUND,
                format!("Durable Object class \"{}\" is not hosted here", class_name),
            )
                .into_response(),
        }
    }

    pub async fn call(
        &self,
        class_name: &str,
        id: &str,
        member: &str,
        args: Vec<Value>,
    ) -> Result<Value, RemoteError> {
        match self.get(class_name, id) {
            Some(instance) => instance.call(member, args).await,
            None => Err(RemoteError::new(format!(
                "Durable Object class \"{}\" is not hosted here",
                class_name
            ))),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counter {
        value: AtomicU64,
    }

    #[async_trait]
    impl DurableObject for Counter {
        async fn fetch(&self, _request: Request) -> Response {
            let value = self.value.fetch_add(1, Ordering::SeqCst) + 1;
            value.to_string().into_response()
        }

        async fn call(&self, member: &str, _args: Vec<Value>) -> Result<Value, RemoteError> {
            match member {
                "get" => Ok(Value::from(self.value.load(Ordering::SeqCst))),
                other => Err(missing_member(other)),
            }
        }
    }

    struct CounterClass;

    impl DurableObjectClass for CounterClass {
        fn class_name(&self) -> &str {
            "Counter"
        }

        fn instantiate(&self, _id: &str) -> Arc<dyn DurableObject> {
            Arc::new(Counter {
                value: AtomicU64::new(0),
            })
        }
    }

    #[tokio::test]
    async fn test_instances_are_kept_per_id() {
        let host = DurableObjectHost::new();
        host.register_class(Arc::new(CounterClass));

        for _ in 0..3 {
            host.fetch("Counter", "a", Request::new(Body::empty())).await;
        }
        host.fetch("Counter", "b", Request::new(Body::empty())).await;

        assert_eq!(host.call("Counter", "a", "get", vec![]).await, Ok(Value::from(3)));
        assert_eq!(host.call("Counter", "b", "get", vec![]).await, Ok(Value::from(1)));
    }

    #[tokio::test]
    async fn test_unknown_class_and_member() {
        let host = DurableObjectHost::new();
        host.register_class(Arc::new(CounterClass));

        let response = host.fetch("Missing", "a", Request::new(Body::empty())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let err = host.call("Counter", "a", "reset", vec![]).await.unwrap_err();
        assert_eq!(err.name, "TypeError");
        assert!(err.message.contains("\"reset\""));
        assert_eq!(host.class_names(), vec!["Counter".to_string()]);
    }
}
