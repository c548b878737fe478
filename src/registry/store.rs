//! File-system registry: one JSON file per worker name in a shared directory.
//!
//! Writers go through a hidden temp file and an atomic rename, so readers
//! only ever observe complete records. There is no lock and no cache: every
//! lookup reads the directory again.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::descriptor::SessionDescriptor;
use super::error::RegistryError;

/// Environment variable overriding the registry location.
pub const REGISTRY_PATH_ENV: &str = "DEV_REGISTRY_PATH";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Debug)]
pub struct RegistryStore {
    dir: PathBuf,
    stale_after: Option<Duration>,
}

impl RegistryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stale_after: None,
        }
    }

    /// Registry at `DEV_REGISTRY_PATH`, or the per-user default directory.
    pub fn from_env() -> Result<Self, RegistryError> {
        default_registry_dir().map(Self::new)
    }

    /// Ignore entries whose heartbeat is older than `stale_after`.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, worker_name: &str) -> PathBuf {
        self.dir.join(entry_file_name(worker_name))
    }

    /// Write (or replace) the entry for `descriptor.worker_name`.
    pub async fn register(&self, descriptor: &SessionDescriptor) -> Result<(), RegistryError> {
        let content = serde_json::to_vec_pretty(descriptor).map_err(RegistryError::Serialize)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RegistryError::io(&self.dir, e))?;

        let entry_path = self.entry_path(&descriptor.worker_name);
        let tmp_path = self.temp_path(&descriptor.worker_name);

        let written = write_synced(&tmp_path, &content).await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(RegistryError::io(&tmp_path, e));
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, &entry_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(RegistryError::io(&entry_path, e));
        }

        debug!(
            worker = %descriptor.worker_name,
            path = %entry_path.display(),
            "registered session"
        );
        Ok(())
    }

    /// Remove the entry for `worker_name`. Missing entries are not an error.
    pub async fn unregister(&self, worker_name: &str) -> Result<(), RegistryError> {
        let entry_path = self.entry_path(worker_name);
        match tokio::fs::remove_file(&entry_path).await {
            Ok(()) => {
                debug!(worker = %worker_name, "unregistered session");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RegistryError::io(entry_path, e)),
        }
    }

    /// Fresh read of one entry.
    pub async fn get(&self, worker_name: &str) -> Result<Option<SessionDescriptor>, RegistryError> {
        self.read_entry(&self.entry_path(worker_name)).await
    }

    /// Fresh read of every entry, keyed by worker name.
    pub async fn list(&self) -> Result<BTreeMap<String, SessionDescriptor>, RegistryError> {
        let mut sessions = BTreeMap::new();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(sessions),
            Err(e) => return Err(RegistryError::io(&self.dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RegistryError::io(&self.dir, e))?
        {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            let Ok(worker_name) = urlencoding::decode(file_name) else {
                continue;
            };

            if let Some(descriptor) = self.read_entry(&entry.path()).await? {
                sessions.insert(worker_name.into_owned(), descriptor);
            }
        }

        Ok(sessions)
    }

    /// Bump the entry's modification time.
    pub async fn touch(&self, worker_name: &str) -> Result<(), RegistryError> {
        let entry_path = self.entry_path(worker_name);
        let path = entry_path.clone();

        let result = tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new().write(true).open(&path)?;
            file.set_modified(SystemTime::now())
        })
        .await
        .map_err(|e| RegistryError::io(&entry_path, std::io::Error::other(e)))?;

        result.map_err(|e| RegistryError::io(entry_path, e))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<SessionDescriptor>, RegistryError> {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RegistryError::io(path, e)),
        };

        if let Some(stale_after) = self.stale_after {
            if self.is_stale(path, stale_after).await {
                debug!(path = %path.display(), "ignoring stale registry entry");
                return Ok(None);
            }
        }

        match serde_json::from_slice::<SessionDescriptor>(&content) {
            Ok(descriptor) => Ok(Some(descriptor)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable registry entry");
                Ok(None)
            }
        }
    }

    async fn is_stale(&self, path: &Path, stale_after: Duration) -> bool {
        let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > stale_after)
            .unwrap_or(false)
    }

    fn temp_path(&self, worker_name: &str) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            ".{}.{}.{}.tmp",
            entry_file_name(worker_name),
            std::process::id(),
            n
        ))
    }
}

/// Percent-encoded worker name. A leading `.` is escaped too, so `..` stays
/// inside the directory and no entry looks like a temp file.
fn entry_file_name(worker_name: &str) -> String {
    let encoded = urlencoding::encode(worker_name);
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded.into_owned(),
    }
}

/// `DEV_REGISTRY_PATH` if set and non-empty, else `<config dir>/dev-registry/registry`.
pub fn default_registry_dir() -> Result<PathBuf, RegistryError> {
    if let Some(path) = std::env::var_os(REGISTRY_PATH_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("dev-registry").join("registry"))
        .ok_or(RegistryError::NoRegistryDir)
}

async fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}
