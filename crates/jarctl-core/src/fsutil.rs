use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::errors::{IoContext, ManagerError};

pub(crate) fn remove_file_if_exists(path: &Path) -> Result<(), ManagerError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ManagerError::io(format!("removing {}", path.display()), err)),
    }
}

pub(crate) fn remove_dir_if_exists(path: &Path) -> Result<(), ManagerError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ManagerError::io(format!("removing {}", path.display()), err)),
    }
}

/// `chown -R uid:gid root`, without following symlinks.
pub(crate) fn chown_tree(root: &Path, uid: u32, gid: u32) -> Result<(), ManagerError> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|err| {
            let context = format!("walking {}", root.display());
            match err.into_io_error() {
                Some(io) => ManagerError::io(context, io),
                None => ManagerError::Config(format!("{context}: filesystem loop")),
            }
        })?;
        std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid))
            .io_context(|| format!("changing owner of {}", entry.path().display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use super::*;

    #[test]
    fn chown_tree_reaches_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        fs::create_dir_all(root.join("world/region")).unwrap();
        fs::write(root.join("world/level.dat"), b"x").unwrap();
        std::os::unix::fs::symlink("world/level.dat", root.join("latest")).unwrap();
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };

        chown_tree(&root, uid, gid).unwrap();

        for entry in WalkDir::new(&root) {
            let meta = entry.unwrap().path().symlink_metadata().unwrap();
            assert_eq!((meta.uid(), meta.gid()), (uid, gid));
        }
    }

    #[test]
    fn removal_helpers_tolerate_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        remove_file_if_exists(&dir.path().join("absent")).unwrap();
        remove_dir_if_exists(&dir.path().join("absent")).unwrap();
    }
}
