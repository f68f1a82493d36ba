use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::errors::{IoContext, ManagerError};

/// Recursively copy `src` into a fresh `dst`. Symlinks are recreated, not
/// followed.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), ManagerError> {
    fs::create_dir_all(dst).io_context(|| format!("creating {}", dst.display()))?;
    for entry in WalkDir::new(src).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|err| walk_error(src, err))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| ManagerError::Verification(format!("{} escaped {}", entry.path().display(), src.display())))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).io_context(|| format!("creating {}", target.display()))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .io_context(|| format!("reading link {}", entry.path().display()))?;
            std::os::unix::fs::symlink(&link, &target)
                .io_context(|| format!("linking {}", target.display()))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)
                .io_context(|| format!("copying {}", entry.path().display()))?;
        } else {
            warn!("skipping special file {}", entry.path().display());
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Node {
    Dir,
    File(u64),
    Link(PathBuf),
}

fn inventory(root: &Path) -> Result<BTreeMap<PathBuf, Node>, ManagerError> {
    let mut nodes = BTreeMap::new();
    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|err| walk_error(root, err))?;
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path()).to_path_buf();
        let file_type = entry.file_type();
        let node = if file_type.is_dir() {
            Node::Dir
        } else if file_type.is_symlink() {
            Node::Link(
                fs::read_link(entry.path())
                    .io_context(|| format!("reading link {}", entry.path().display()))?,
            )
        } else if file_type.is_file() {
            let meta = entry
                .metadata()
                .map_err(|err| walk_error(root, err))?;
            Node::File(meta.len())
        } else {
            continue;
        };
        nodes.insert(rel, node);
    }
    Ok(nodes)
}

/// Check that `copy` holds the same paths, kinds and file sizes as `original`.
pub fn verify_tree(original: &Path, copy: &Path) -> Result<(), ManagerError> {
    let expected = inventory(original)?;
    let actual = inventory(copy)?;
    if expected == actual {
        return Ok(());
    }

    let first_diff = expected
        .iter()
        .find(|(path, node)| actual.get(*path) != Some(node))
        .map(|(path, _)| path.clone())
        .or_else(|| actual.keys().find(|path| !expected.contains_key(*path)).cloned())
        .unwrap_or_default();
    Err(ManagerError::Verification(format!(
        "{} differs after copy",
        first_diff.display()
    )))
}

fn walk_error(root: &Path, err: walkdir::Error) -> ManagerError {
    let context = format!("walking {}", root.display());
    match err.into_io_error() {
        Some(io) => ManagerError::io(context, io),
        None => ManagerError::Verification(format!("{context}: filesystem loop")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(root: &Path) {
        fs::create_dir_all(root.join("world/region")).unwrap();
        fs::write(root.join("world/level.dat"), [0u8, 1, 2, 255]).unwrap();
        fs::write(root.join("world/region/r.0.0.mca"), vec![7u8; 4096]).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        std::os::unix::fs::symlink("world/level.dat", root.join("latest")).unwrap();
    }

    #[test]
    fn copy_reproduces_tree_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        seed(&src);

        copy_tree(&src, &dst).unwrap();

        verify_tree(&src, &dst).unwrap();
        assert_eq!(fs::read(dst.join("world/level.dat")).unwrap(), vec![0u8, 1, 2, 255]);
        assert!(dst.join("empty").is_dir());
        assert_eq!(fs::read_link(dst.join("latest")).unwrap(), PathBuf::from("world/level.dat"));
    }

    #[test]
    fn verify_reports_missing_and_resized_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        seed(&src);
        copy_tree(&src, &dst).unwrap();

        fs::write(dst.join("world/level.dat"), b"short").unwrap();
        assert!(matches!(verify_tree(&src, &dst), Err(ManagerError::Verification(_))));

        fs::write(dst.join("world/level.dat"), [0u8, 1, 2, 255]).unwrap();
        fs::write(dst.join("extra"), b"x").unwrap();
        assert!(matches!(verify_tree(&src, &dst), Err(ManagerError::Verification(_))));
    }
}
