use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("server is already installed")]
    AlreadyInstalled,

    #[error("server is not installed")]
    NotInstalled,

    #[error("server is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("server is already stopped")]
    AlreadyStopped,

    #[error("server (pid {pid}) did not exit within {waited_secs}s of SIGTERM")]
    StillRunning { pid: u32, waited_secs: u64 },

    #[error("nothing to back up: {} does not exist", .0.display())]
    NothingToBackup(PathBuf),

    #[error("invalid backup name '{0}': only letters, digits and '-' are allowed")]
    InvalidBackupName(String),

    #[error("backup '{0}' already exists")]
    BackupExists(String),

    #[error("no backup matches '{0}'")]
    BackupNotFound(String),

    #[error("'{identifier}' matches more than one backup: {}", candidates.join(", "))]
    AmbiguousBackupMatch {
        identifier: String,
        candidates: Vec<String>,
    },

    #[error("restored copy does not match backup: {0}")]
    Verification(String),

    #[error("network request failed: {0}")]
    Network(String),

    #[error("invalid release metadata: {0}")]
    Release(String),

    #[error("another jarctl operation holds {}", .0.display())]
    Busy(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl ManagerError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Attach a context string to `std::io::Result` values.
pub(crate) trait IoContext<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> Result<T, ManagerError>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> Result<T, ManagerError> {
        self.map_err(|source| ManagerError::io(context(), source))
    }
}
