//! Polling watcher publishing registry snapshots when the set of sessions changes.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use super::descriptor::SessionDescriptor;
use super::store::RegistryStore;

pub type RegistrySnapshot = BTreeMap<String, SessionDescriptor>;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Background task polling a [`RegistryStore`].
///
/// Subscribers receive a new snapshot only when some descriptor was added,
/// removed or replaced. Dropping the watcher stops the task.
pub struct RegistryWatcher {
    receiver: watch::Receiver<RegistrySnapshot>,
    handle: JoinHandle<()>,
}

impl RegistryWatcher {
    pub fn spawn(store: RegistryStore, interval: Duration) -> Self {
        let (sender, receiver) = watch::channel(RegistrySnapshot::new());

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = match store.list().await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(error = %e, "registry poll failed");
                        continue;
                    }
                };
                sender.send_if_modified(|current| {
                    if *current == snapshot {
                        false
                    } else {
                        *current = snapshot;
                        true
                    }
                });
                if sender.is_closed() {
                    break;
                }
            }
        });

        Self { receiver, handle }
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrySnapshot> {
        self.receiver.clone()
    }

    pub fn current(&self) -> RegistrySnapshot {
        self.receiver.borrow().clone()
    }
}

impl Drop for RegistryWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Names added and removed between two snapshots.
pub fn diff(previous: &RegistrySnapshot, next: &RegistrySnapshot) -> (Vec<String>, Vec<String>) {
    let added = next
        .keys()
        .filter(|name| !previous.contains_key(*name))
        .cloned()
        .collect();
    let removed = previous
        .keys()
        .filter(|name| !next.contains_key(*name))
        .cloned()
        .collect();
    (added, removed)
}
