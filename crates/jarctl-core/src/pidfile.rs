use std::fs;
use std::path::Path;

use tracing::warn;

use crate::config::ensure_parent;
use crate::errors::{IoContext, ManagerError};
use crate::fsutil::remove_file_if_exists;

/// Read the recorded pid. A missing or unparsable file reads as `None`.
pub fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    match content.trim().parse::<u32>() {
        Ok(pid) if pid > 0 => Some(pid),
        _ => {
            warn!("ignoring malformed pid file {}", path.display());
            None
        }
    }
}

pub fn write_pid(path: &Path, pid: u32) -> Result<(), ManagerError> {
    ensure_parent(path)?;
    let tmp = path.with_extension("pid.tmp");
    fs::write(&tmp, format!("{pid}\n")).io_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).io_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

pub fn remove_pid(path: &Path) -> Result<(), ManagerError> {
    remove_file_if_exists(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("server.pid");
        assert_eq!(read_pid(&path), None);

        write_pid(&path, 4242).unwrap();
        assert_eq!(read_pid(&path), Some(4242));

        remove_pid(&path).unwrap();
        assert_eq!(read_pid(&path), None);
        remove_pid(&path).unwrap();
    }

    #[test]
    fn garbage_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.pid");
        fs::write(&path, "not-a-pid").unwrap();
        assert_eq!(read_pid(&path), None);
        fs::write(&path, "0").unwrap();
        assert_eq!(read_pid(&path), None);
    }
}
