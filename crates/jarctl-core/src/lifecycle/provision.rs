use std::path::Path;
use std::process::Command;

use tracing::{info, warn};

use crate::config::{ManagerConfig, ensure_parent};
use crate::errors::{IoContext, ManagerError};
use crate::fsutil::chown_tree;
use crate::supervisor::{is_root, lookup_user};

/// Create the low-privilege account the server runs as, if it is missing.
/// Without root the step is skipped and the server runs as the caller.
pub(super) fn ensure_service_user(user: &str) -> Result<(), ManagerError> {
    if lookup_user(user).is_some() {
        return Ok(());
    }
    if !is_root() {
        warn!("not running as root; skipping creation of service user {user}");
        return Ok(());
    }

    let status = Command::new("useradd")
        .args(["--system", "--no-create-home", "--shell", "/usr/sbin/nologin"])
        .arg(user)
        .status()
        .io_context(|| "running useradd".to_string())?;
    if !status.success() {
        return Err(ManagerError::Config(format!(
            "useradd {user} exited with {status}"
        )));
    }
    info!("created service user {user}");
    Ok(())
}

/// Give the service account ownership of the directories it writes to,
/// using the account's own primary group.
pub(super) fn hand_over(user: &str, dirs: &[&Path]) {
    if !is_root() {
        return;
    }
    let Some((uid, gid)) = lookup_user(user) else {
        warn!("service user {user} not found; leaving ownership unchanged");
        return;
    };
    for dir in dirs {
        if let Err(err) = chown_tree(dir, uid, gid) {
            warn!("failed to hand {} to {user}: {err}", dir.display());
        }
    }
}

/// Returns false when a config file already exists and was left alone.
pub(super) fn write_default_server_config(config: &ManagerConfig) -> Result<bool, ManagerError> {
    let path = &config.config_path;
    if path.exists() {
        return Ok(false);
    }
    ensure_parent(path)?;
    std::fs::write(path, default_server_config(config))
        .io_context(|| format!("writing {}", path.display()))?;
    Ok(true)
}

fn default_server_config(config: &ManagerConfig) -> String {
    let mut out = String::new();
    out.push_str("# Generated by jarctl.\n");
    out.push_str(&format!("data-dir={}\n", config.data_dir.display()));
    out.push_str(&format!("log-file={}\n", config.log_path.display()));
    out.push_str(&format!("pid-file={}\n", config.pid_path.display()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::rooted_at(dir.path());

        assert!(write_default_server_config(&config).unwrap());
        let written = std::fs::read_to_string(&config.config_path).unwrap();
        assert!(written.contains(&format!("data-dir={}", config.data_dir.display())));

        std::fs::write(&config.config_path, "custom=1\n").unwrap();
        assert!(!write_default_server_config(&config).unwrap());
        assert_eq!(std::fs::read_to_string(&config.config_path).unwrap(), "custom=1\n");
    }

    #[test]
    fn hand_over_uses_the_accounts_primary_group() {
        let Some((uid, gid)) = lookup_user("nobody") else {
            return;
        };
        if !is_root() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(data.join("world")).unwrap();
        std::fs::write(data.join("world/level.dat"), b"x").unwrap();

        hand_over("nobody", &[&data]);

        use std::os::unix::fs::MetadataExt;
        for path in [data.clone(), data.join("world/level.dat")] {
            let meta = std::fs::metadata(&path).unwrap();
            assert_eq!((meta.uid(), meta.gid()), (uid, gid), "{}", path.display());
        }
    }

    #[test]
    fn existing_account_needs_no_provisioning() {
        ensure_service_user("root").unwrap();
    }
}
