mod copy;
mod naming;

pub use naming::{DEFAULT_BACKUP_NAME, TIMESTAMP_FORMAT, is_full_backup_name, validate_name};

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tokio::task;
use tracing::{info, warn};

use crate::errors::{IoContext, ManagerError};
use crate::fsutil::{chown_tree, remove_dir_if_exists};
use crate::lifecycle::LifecycleManager;
use crate::release::ReleaseSource;
use crate::supervisor::{ProcessSupervisor, is_root, lookup_user};

const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    /// Full directory name, `<name>_<timestamp>`.
    pub id: String,
    pub name: String,
    pub created_at: Option<NaiveDateTime>,
    pub path: PathBuf,
}

impl BackupEntry {
    fn from_dir(path: PathBuf) -> Option<Self> {
        let id = path.file_name()?.to_str()?.to_string();
        if id.starts_with('.') {
            return None;
        }
        let (name, stamp) = naming::split_dir_name(&id)?;
        Some(Self {
            name: name.to_string(),
            created_at: naming::parse_timestamp(stamp),
            id,
            path,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub backup: BackupEntry,
    pub stopped_pid: Option<u32>,
    pub started_pid: u32,
}

/// Point-in-time copies of the data directory under the backup root.
pub struct BackupManager<'a, P, R> {
    lifecycle: &'a LifecycleManager<P, R>,
}

impl<'a, P: ProcessSupervisor, R: ReleaseSource> BackupManager<'a, P, R> {
    pub fn new(lifecycle: &'a LifecycleManager<P, R>) -> Self {
        Self { lifecycle }
    }

    fn data_dir(&self) -> &Path {
        &self.lifecycle.config().data_dir
    }

    fn backup_root(&self) -> &Path {
        &self.lifecycle.config().backup_root
    }

    /// `None` falls back to the default name.
    pub async fn backup(&self, name: Option<&str>) -> Result<BackupEntry, ManagerError> {
        self.backup_at(name, chrono::Local::now().naive_local()).await
    }

    pub(crate) async fn backup_at(
        &self,
        name: Option<&str>,
        at: NaiveDateTime,
    ) -> Result<BackupEntry, ManagerError> {
        let data_dir = self.data_dir().to_path_buf();
        if !data_dir.is_dir() {
            return Err(ManagerError::NothingToBackup(data_dir));
        }
        let name = name.unwrap_or(DEFAULT_BACKUP_NAME);
        validate_name(name)?;
        // restore swaps data_dir under the same lock
        let _guard = self.lifecycle.lock()?;

        let id = naming::dir_name(name, at);
        let root = self.backup_root().to_path_buf();
        let dest = root.join(&id);
        if dest.exists() {
            return Err(ManagerError::BackupExists(id));
        }

        let staging = root.join(format!("{STAGING_PREFIX}{id}"));
        let dst = dest.clone();
        task::spawn_blocking(move || -> Result<(), ManagerError> {
            fs::create_dir_all(&root).io_context(|| format!("creating {}", root.display()))?;
            remove_dir_if_exists(&staging)?;
            if let Err(err) = copy::copy_tree(&data_dir, &staging) {
                let _ = fs::remove_dir_all(&staging);
                return Err(err);
            }
            fs::rename(&staging, &dst)
                .io_context(|| format!("moving backup into {}", dst.display()))?;
            Ok(())
        })
        .await
        .map_err(join_error)??;

        info!("backup created: {}", dest.display());
        Ok(BackupEntry {
            id,
            name: name.to_string(),
            created_at: Some(at),
            path: dest,
        })
    }

    /// Backups under the root, newest first. Staging leftovers and foreign
    /// directories are ignored.
    pub fn list(&self) -> Result<Vec<BackupEntry>, ManagerError> {
        let root = self.backup_root();
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ManagerError::io(format!("reading {}", root.display()), err)),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.io_context(|| format!("reading {}", root.display()))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(backup) = BackupEntry::from_dir(path) {
                backups.push(backup);
            }
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(backups)
    }

    /// Exact match for a full `<name>_<timestamp>` identifier, prefix match
    /// otherwise. The prefix must select exactly one backup.
    pub fn resolve(&self, identifier: &str) -> Result<BackupEntry, ManagerError> {
        let identifier = identifier.trim();
        if identifier.is_empty() || identifier.contains('/') || identifier.starts_with('.') {
            return Err(ManagerError::InvalidBackupName(identifier.to_string()));
        }

        if is_full_backup_name(identifier) {
            let path = self.backup_root().join(identifier);
            return if path.is_dir() {
                BackupEntry::from_dir(path)
                    .ok_or_else(|| ManagerError::BackupNotFound(identifier.to_string()))
            } else {
                Err(ManagerError::BackupNotFound(identifier.to_string()))
            };
        }

        let mut matches: Vec<BackupEntry> = self
            .list()?
            .into_iter()
            .filter(|backup| backup.id.starts_with(identifier))
            .collect();
        match matches.len() {
            0 => Err(ManagerError::BackupNotFound(identifier.to_string())),
            1 => Ok(matches.remove(0)),
            _ => {
                let mut candidates: Vec<String> = matches.into_iter().map(|b| b.id).collect();
                candidates.sort();
                Err(ManagerError::AmbiguousBackupMatch {
                    identifier: identifier.to_string(),
                    candidates,
                })
            }
        }
    }

    /// Stop the server, swap the data directory for a verified copy of the
    /// backup, then start the server again.
    pub async fn restore(&self, identifier: &str) -> Result<RestoreReport, ManagerError> {
        let backup = self.resolve(identifier)?;

        let _guard = self.lifecycle.lock()?;
        let stopped_pid = self.lifecycle.stop_tolerant().await?;

        let src = backup.path.clone();
        let live = self.data_dir().to_path_buf();
        let owner = self.restored_owner();
        task::spawn_blocking(move || swap_in_copy(&src, &live, owner))
            .await
            .map_err(join_error)??;
        info!("data directory restored from {}", backup.id);

        let started_pid = self.lifecycle.start_locked()?;
        Ok(RestoreReport {
            backup,
            stopped_pid,
            started_pid,
        })
    }

    /// Who should own the restored tree: the service account when one is
    /// configured, else whoever owns the data directory being replaced.
    /// Only root can hand files to another account.
    fn restored_owner(&self) -> Option<(u32, u32)> {
        if !is_root() {
            return None;
        }
        if let Some(ids) = self
            .lifecycle
            .config()
            .service_user
            .as_deref()
            .and_then(lookup_user)
        {
            return Some(ids);
        }
        fs::metadata(self.data_dir())
            .ok()
            .map(|meta| (meta.uid(), meta.gid()))
    }
}

/// Copy `src` next to `live`, verify it, hand it to `owner`, then rename it
/// over `live`. The live directory is only moved aside once a complete copy
/// exists, and is moved back if the final rename fails.
fn swap_in_copy(
    src: &Path,
    live: &Path,
    owner: Option<(u32, u32)>,
) -> Result<(), ManagerError> {
    let parent = live
        .parent()
        .ok_or_else(|| ManagerError::Config(format!("{} has no parent", live.display())))?;
    let base = live
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "data".to_string());
    let staging = parent.join(format!(".{base}.restore-staging"));
    let aside = parent.join(format!(".{base}.restore-previous"));

    remove_dir_if_exists(&staging)?;
    let prepared = copy::copy_tree(src, &staging)
        .and_then(|()| copy::verify_tree(src, &staging))
        .and_then(|()| match owner {
            Some((uid, gid)) => chown_tree(&staging, uid, gid),
            None => Ok(()),
        });
    if let Err(err) = prepared {
        let _ = fs::remove_dir_all(&staging);
        return Err(err);
    }

    remove_dir_if_exists(&aside)?;
    let had_live = live.exists();
    if had_live {
        fs::rename(live, &aside).io_context(|| format!("moving {} aside", live.display()))?;
    }
    if let Err(err) = fs::rename(&staging, live) {
        if had_live {
            if let Err(rollback) = fs::rename(&aside, live) {
                warn!("failed to put {} back: {rollback}", live.display());
            }
        }
        return Err(ManagerError::io(format!("moving restored copy to {}", live.display()), err));
    }

    if had_live {
        if let Err(err) = fs::remove_dir_all(&aside) {
            warn!("failed to remove previous data {}: {err}", aside.display());
        }
    }
    Ok(())
}

fn join_error(err: task::JoinError) -> ManagerError {
    ManagerError::io("waiting for file copy", std::io::Error::other(err))
}
