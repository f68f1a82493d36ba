use fs2::FileExt;
use std::{fs::File, fs::OpenOptions, path::Path};

use crate::config::ensure_parent;
use crate::errors::ManagerError;

/// Held for the duration of a pid-file or state read-modify-write.
/// Dropping the guard closes the file, which releases the lock.
pub struct LockGuard {
    _file: File,
}

pub fn acquire_lock(path: &Path) -> Result<LockGuard, ManagerError> {
    ensure_parent(path)?;
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|err| ManagerError::io(format!("opening {}", path.display()), err))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(LockGuard { _file: file }),
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
            Err(ManagerError::Busy(path.to_path_buf()))
        }
        Err(err) => Err(ManagerError::io(format!("locking {}", path.display()), err)),
    }
}
