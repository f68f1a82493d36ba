use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use jarctl_core::ManagerConfig;
use tracing::{info, warn};

pub fn install_shim(config: &ManagerConfig) -> Result<()> {
    let exe = std::env::current_exe().context("Failed to resolve jarctl path")?;
    let target = &config.shim_path;

    if same_file(&exe, target) {
        println!("jarctl is already installed at {}.", target.display());
        return Ok(());
    }

    let bytes = fs::read(&exe).with_context(|| format!("Failed to read {}", exe.display()))?;
    write_executable_atomic(target, &bytes)?;
    info!("copied {} -> {}", exe.display(), target.display());
    println!("jarctl installed at {}.", target.display());
    Ok(())
}

pub fn remove_shim(config: &ManagerConfig) -> Result<()> {
    let target = &config.shim_path;
    match fs::remove_file(target) {
        Ok(()) => {
            println!("Removed {}.", target.display());
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!("{} is not installed", target.display());
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("Failed to remove {}", target.display())),
    }
}

/// Write through a sibling temp file and rename, so a running copy of the
/// old binary is never truncated in place.
pub fn write_executable_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .with_context(|| format!("{} has no parent directory", target.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {} (are you root?)", parent.display()))?;

    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "jarctl".to_string());
    let tmp = parent.join(format!(".{file_name}.tmp"));
    fs::write(&tmp, bytes)
        .with_context(|| format!("Failed to write {} (are you root?)", tmp.display()))?;
    fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to chmod {}", tmp.display()))?;
    if let Err(err) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(err).with_context(|| format!("Failed to replace {}", target.display()));
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
