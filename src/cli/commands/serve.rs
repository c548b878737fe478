use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::ServeArgs;
use crate::config::load_config_from_path;
use crate::proxy::ProxyClient;
use crate::registry::watcher::{diff, DEFAULT_POLL_INTERVAL};
use crate::registry::{BindingTargets, RegistrySnapshot, RegistryWatcher};
use crate::resolver::BindingResolver;

pub async fn execute_serve(registry: Option<&std::path::Path>, args: ServeArgs) -> Result<()> {
    let config = load_config_from_path(&args.config)?;
    config
        .validate()
        .with_context(|| format!("Invalid {}", args.config.display()))?;

    let store = config.registry_store(registry)?;
    let client = ProxyClient::new()?;
    let resolver = BindingResolver::new(store.clone());

    let session = config.session_builder(&client).start(store.clone()).await?;
    let gateway = config
        .gateway(&resolver, &client, &session)
        .bind(&config.host, config.gateway_port)
        .await?;

    eprintln!(
        "Session '{}' registered in {}",
        session.worker_name(),
        store.path().display()
    );
    if let Some(url) = session.url(crate::registry::DEFAULT_ENTRYPOINT) {
        eprintln!("  default entrypoint: {}", url);
    }
    eprintln!("  binding gateway:    http://{}", gateway.addr());
    eprintln!("Press Ctrl+C to stop.\n");

    let targets = config.binding_targets();
    let mut bound = session.bound_sessions(&targets).await?;
    for name in bound.keys() {
        info!(worker = %name, "dependency already running");
    }

    let watcher = RegistryWatcher::spawn(store, DEFAULT_POLL_INTERVAL);
    let mut changes = watcher.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    warn!("registry watcher stopped");
                    break;
                }
                let next = dependencies(&changes.borrow(), &targets, session.worker_name());
                log_changes(&bound, &next);
                bound = next;
            }
        }
    }

    gateway.stop().await;
    session.stop().await?;
    eprintln!("Session unregistered.");
    Ok(())
}

fn dependencies(
    snapshot: &RegistrySnapshot,
    targets: &BindingTargets,
    own_name: &str,
) -> BTreeMap<String, crate::registry::SessionDescriptor> {
    snapshot
        .iter()
        .filter(|(name, _)| name.as_str() != own_name)
        .filter(|(name, _)| {
            targets.services.contains(name) || targets.durable_object_scripts.contains(name)
        })
        .map(|(name, descriptor)| (name.clone(), descriptor.clone()))
        .collect()
}

fn log_changes(previous: &RegistrySnapshot, next: &RegistrySnapshot) {
    let (added, removed) = diff(previous, next);
    for name in added {
        info!(worker = %name, "dependency started");
    }
    for name in removed {
        warn!(worker = %name, "dependency stopped");
    }
    for (name, descriptor) in next {
        if previous.get(name).is_some_and(|old| old != descriptor) {
            info!(worker = %name, "dependency restarted");
        }
    }
}
