// tests/e2e_rpc.rs
mod helpers;

use std::sync::Arc;

use dev_registry::{ProxyError, SessionBuilder};
use helpers::{can_bind_loopback, isolated_registry, service_binding, Forwarder, Responder};
use serde_json::json;

#[tokio::test]
async fn test_unresolved_call_message() {
    let (_dir, store) = isolated_registry();
    let binding = service_binding(&store, "bound", Some("ThingEntrypoint"));

    let err = binding.call("ping", vec![]).await.unwrap_err();
    assert!(matches!(err, ProxyError::RpcTargetNotFound { .. }));
    assert!(err.is_unresolved());
    assert_eq!(
        err.to_string(),
        "Cannot access \"ping\" as we couldn't find a local dev session for the \"ThingEntrypoint\" entrypoint of service \"bound\" to proxy to."
    );

    let default = service_binding(&store, "bound", None);
    let err = default.call("ping", vec![]).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot access \"ping\" as we couldn't find a local dev session for the \"default\" entrypoint of service \"bound\" to proxy to."
    );
}

#[tokio::test]
async fn test_call_returns_result() {
    if !can_bind_loopback().await {
        eprintln!("skipping e2e rpc test: cannot bind to loopback in this environment");
        return;
    }

    let (_dir, store) = isolated_registry();
    let session = SessionBuilder::new("bound")
        .default_entrypoint(Arc::new(Responder("default")))
        .entrypoint("ThingEntrypoint", 0, Arc::new(Responder("thing")))
        .start(store.clone())
        .await
        .unwrap();

    let default = service_binding(&store, "bound", None);
    assert_eq!(default.call("ping", vec![]).await.unwrap(), json!("pong"));
    assert_eq!(
        default.call("add", vec![json!(2), json!(40)]).await.unwrap(),
        json!(42)
    );

    let thing = service_binding(&store, "bound", Some("ThingEntrypoint"));
    assert_eq!(thing.call("whoami", vec![]).await.unwrap(), json!("thing"));

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_thrown_error_reaches_caller() {
    if !can_bind_loopback().await {
        eprintln!("skipping e2e rpc test: cannot bind to loopback in this environment");
        return;
    }

    let (_dir, store) = isolated_registry();
    let session = SessionBuilder::new("bound")
        .default_entrypoint(Arc::new(Responder("default")))
        .start(store.clone())
        .await
        .unwrap();
    let binding = service_binding(&store, "bound", None);

    match binding.call("fail", vec![]).await {
        Err(ProxyError::Remote(remote)) => {
            assert_eq!(remote.name, "RangeError");
            assert_eq!(remote.message, "intentional failure");
        }
        other => panic!("expected a thrown error, got {:?}", other),
    }

    match binding.call("nope", vec![]).await {
        Err(ProxyError::Remote(remote)) => {
            assert_eq!(remote.name, "TypeError");
            assert!(remote.message.contains("nope"), "{}", remote.message);
        }
        other => panic!("expected a thrown error, got {:?}", other),
    }

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_calls_through_an_intermediate_session() {
    if !can_bind_loopback().await {
        eprintln!("skipping e2e rpc test: cannot bind to loopback in this environment");
        return;
    }

    let (_dir, store) = isolated_registry();
    let c = SessionBuilder::new("c")
        .default_entrypoint(Arc::new(Responder("c")))
        .start(store.clone())
        .await
        .unwrap();
    let b = SessionBuilder::new("b")
        .default_entrypoint(Arc::new(Forwarder(service_binding(&store, "c", None))))
        .start(store.clone())
        .await
        .unwrap();

    let binding = service_binding(&store, "b", None);
    assert_eq!(binding.call("whoami", vec![]).await.unwrap(), json!("c"));

    // c throws; b rethrows what it caught
    match binding.call("fail", vec![]).await {
        Err(ProxyError::Remote(remote)) => assert_eq!(remote.message, "intentional failure"),
        other => panic!("expected a thrown error, got {:?}", other),
    }

    c.stop().await.unwrap();

    // b is still up, its own dependency is not
    match binding.call("whoami", vec![]).await {
        Err(ProxyError::Remote(remote)) => assert!(
            remote
                .message
                .starts_with("Cannot access \"whoami\" as we couldn't find"),
            "{}",
            remote.message
        ),
        other => panic!("expected a thrown error, got {:?}", other),
    }

    b.stop().await.unwrap();
}

#[tokio::test]
async fn test_cyclic_bindings() {
    if !can_bind_loopback().await {
        eprintln!("skipping e2e rpc test: cannot bind to loopback in this environment");
        return;
    }

    let (_dir, store) = isolated_registry();
    let a = SessionBuilder::new("a")
        .default_entrypoint(Arc::new(Responder("a")))
        .entrypoint(
            "ToB",
            0,
            Arc::new(Forwarder(service_binding(&store, "b", None))),
        )
        .start(store.clone())
        .await
        .unwrap();
    let b = SessionBuilder::new("b")
        .default_entrypoint(Arc::new(Responder("b")))
        .entrypoint(
            "ToA",
            0,
            Arc::new(Forwarder(service_binding(&store, "a", None))),
        )
        .start(store.clone())
        .await
        .unwrap();

    let a_to_b = service_binding(&store, "a", Some("ToB"));
    let b_to_a = service_binding(&store, "b", Some("ToA"));
    assert_eq!(a_to_b.call("whoami", vec![]).await.unwrap(), json!("b"));
    assert_eq!(b_to_a.call("whoami", vec![]).await.unwrap(), json!("a"));

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}
