use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{IoContext, ManagerError};

pub const CONFIG_ENV: &str = "JARCTL_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/jarctl/config.toml";

/// Every path and knob the managers touch. Nothing in the crate reads a
/// fixed location on its own; callers build one of these and pass it in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub service_user: Option<String>,
    pub install_dir: PathBuf,
    pub data_dir: PathBuf,
    pub backup_root: PathBuf,
    pub config_path: PathBuf,
    pub pid_path: PathBuf,
    pub lock_path: PathBuf,
    pub state_path: PathBuf,
    pub log_path: PathBuf,
    pub java_command: String,
    pub jvm_args: Vec<String>,
    pub server_args: Vec<String>,
    pub release_url: Option<String>,
    pub asset_suffix: String,
    pub self_update_url: Option<String>,
    pub shim_path: PathBuf,
    pub stop_timeout_secs: u64,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 1,
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let state_dir = PathBuf::from("/var/lib/jarctl");
        Self {
            service_user: Some("jarctl".to_string()),
            install_dir: PathBuf::from("/opt/jarctl"),
            data_dir: state_dir.join("data"),
            backup_root: state_dir.join("backups"),
            config_path: PathBuf::from("/etc/jarctl/server.properties"),
            pid_path: state_dir.join("server.pid"),
            lock_path: state_dir.join("jarctl.lock"),
            state_path: state_dir.join("state.json"),
            log_path: PathBuf::from("/var/log/jarctl/server.log"),
            java_command: "java".to_string(),
            jvm_args: vec!["-Xms512M".to_string(), "-Xmx1G".to_string()],
            server_args: Vec::new(),
            release_url: None,
            asset_suffix: ".jar".to_string(),
            self_update_url: None,
            shim_path: PathBuf::from("/usr/local/bin/jarctl"),
            stop_timeout_secs: 30,
            http: HttpConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Resolve the config file from `$JARCTL_CONFIG` or the system default.
    /// A missing file is not an error; defaults apply.
    pub fn load() -> Result<Self, ManagerError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ManagerError> {
        let content = match std::fs::read_to_string(path) {
            Ok(value) => value,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ManagerError::io(format!("reading {}", path.display()), err)),
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ManagerError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Lay out every managed path beneath `root`, with no service account.
    pub fn rooted_at(root: &Path) -> Self {
        Self::default().rebased(root)
    }

    /// Keep the launch and network settings, relocate every path under `root`.
    pub fn rebased(self, root: &Path) -> Self {
        Self {
            service_user: None,
            install_dir: root.join("install"),
            data_dir: root.join("data"),
            backup_root: root.join("backups"),
            config_path: root.join("etc").join("server.properties"),
            pid_path: root.join("server.pid"),
            lock_path: root.join("jarctl.lock"),
            state_path: root.join("state.json"),
            log_path: root.join("logs").join("server.log"),
            shim_path: root.join("bin").join("jarctl"),
            ..self
        }
    }

    fn validate(&self) -> Result<(), ManagerError> {
        if self.java_command.trim().is_empty() {
            return Err(ManagerError::Config("java_command must not be empty".into()));
        }
        if self.data_dir.parent().is_none() {
            return Err(ManagerError::Config(format!(
                "data_dir {} has no parent directory",
                self.data_dir.display()
            )));
        }
        if self.asset_suffix.is_empty() {
            return Err(ManagerError::Config("asset_suffix must not be empty".into()));
        }
        Ok(())
    }

    pub fn release_url(&self) -> Result<&str, ManagerError> {
        self.release_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ManagerError::Config("release_url is not configured".into()))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs.max(1))
    }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<(), ManagerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .io_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ManagerConfig::parse("").unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/jarctl/data"));
        assert_eq!(config.http.max_retries, 1);
        assert_eq!(config.service_user.as_deref(), Some("jarctl"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = ManagerConfig::parse(
            r#"
            data_dir = "/srv/game/data"
            jvm_args = ["-Xmx4G"]
            release_url = "https://example.com/releases/latest"

            [http]
            timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/game/data"));
        assert_eq!(config.jvm_args, vec!["-Xmx4G".to_string()]);
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.http.max_retries, 1);
        assert_eq!(config.release_url().unwrap(), "https://example.com/releases/latest");
    }

    #[test]
    fn blank_release_url_is_rejected_on_use() {
        let config = ManagerConfig::parse("release_url = \"  \"").unwrap();
        assert!(matches!(config.release_url(), Err(ManagerError::Config(_))));
    }

    #[test]
    fn empty_java_command_is_invalid() {
        assert!(ManagerConfig::parse("java_command = \"\"").is_err());
    }

    #[test]
    fn rebased_moves_paths_but_keeps_launch_settings() {
        let config = ManagerConfig::parse("jvm_args = [\"-Xmx8G\"]\nservice_user = \"mc\"").unwrap();
        let config = config.rebased(Path::new("/tmp/sandbox"));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/sandbox/data"));
        assert_eq!(config.pid_path, PathBuf::from("/tmp/sandbox/server.pid"));
        assert_eq!(config.jvm_args, vec!["-Xmx8G".to_string()]);
        assert_eq!(config.service_user, None);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.asset_suffix, ".jar");
    }
}
