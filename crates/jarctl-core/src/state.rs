use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ensure_parent;
use crate::errors::{IoContext, ManagerError};
use crate::fsutil::remove_file_if_exists;

/// What `install` leaves behind for the other operations to find.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub artifact_path: PathBuf,
    pub artifact_name: String,
    pub artifact_version: String,
    pub pid_path: PathBuf,
    pub installed_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// JSON-backed store for the install record. No record means not installed.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<InstallRecord>, ManagerError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(value) => value,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ManagerError::io(
                    format!("reading {}", self.path.display()),
                    err,
                ));
            }
        };
        let record = serde_json::from_str::<InstallRecord>(&content)?;
        Ok(Some(record))
    }

    pub fn require(&self) -> Result<InstallRecord, ManagerError> {
        self.load()?.ok_or(ManagerError::NotInstalled)
    }

    /// Write through a temp file and rename so readers never see a torn record.
    pub fn save(&self, record: &InstallRecord) -> Result<(), ManagerError> {
        ensure_parent(&self.path)?;
        let payload = serde_json::to_string_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload).io_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .io_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), ManagerError> {
        remove_file_if_exists(&self.path)
    }
}
