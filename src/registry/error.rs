use std::path::PathBuf;

/// Errors raised while reading or writing the registry directory.
#[derive(Debug)]
pub enum RegistryError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize(serde_json::Error),
    /// No `DEV_REGISTRY_PATH` and no platform config directory to fall back to.
    NoRegistryDir,
}

impl RegistryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RegistryError::Io {
            path: path.into(),
            source,
        }
    }
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Io { path, source } => {
                write!(f, "registry I/O error at {}: {}", path.display(), source)
            }
            RegistryError::Serialize(e) => write!(f, "failed to serialize descriptor: {}", e),
            RegistryError::NoRegistryDir => write!(
                f,
                "could not determine a registry directory; set DEV_REGISTRY_PATH"
            ),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Io { source, .. } => Some(source),
            RegistryError::Serialize(e) => Some(e),
            RegistryError::NoRegistryDir => None,
        }
    }
}
