mod provision;

use std::fmt;
use std::path::PathBuf;

use tokio::time::{Duration, Instant, sleep};
use tracing::{info, warn};

use crate::config::ManagerConfig;
use crate::errors::{IoContext, ManagerError};
use crate::fsutil::{remove_dir_if_exists, remove_file_if_exists};
use crate::lock::{LockGuard, acquire_lock};
use crate::pidfile::{read_pid, remove_pid, write_pid};
use crate::release::{Release, ReleaseSource};
use crate::state::{InstallRecord, StateStore};
use crate::supervisor::{LaunchSpec, ProcessSupervisor};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Online { pid: u32 },
    Offline,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Online { .. } => f.write_str("online"),
            ServerStatus::Offline => f.write_str("offline"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Upstream still publishes the recorded artifact.
    AlreadyCurrent { version: String },
    Updated {
        from: String,
        to: String,
        artifact_path: PathBuf,
        server_running: bool,
    },
}

/// Drives the managed server through install, start, stop, update and
/// uninstall. All pid and state mutations happen under the advisory lock.
pub struct LifecycleManager<P, R> {
    config: ManagerConfig,
    supervisor: P,
    releases: R,
    store: StateStore,
}

impl<P: ProcessSupervisor, R: ReleaseSource> LifecycleManager<P, R> {
    pub fn new(config: ManagerConfig, supervisor: P, releases: R) -> Self {
        let store = StateStore::new(config.state_path.clone());
        Self {
            config,
            supervisor,
            releases,
            store,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn supervisor(&self) -> &P {
        &self.supervisor
    }

    #[cfg(test)]
    pub(crate) fn releases(&self) -> &R {
        &self.releases
    }

    pub fn installation(&self) -> Result<Option<InstallRecord>, ManagerError> {
        self.store.load()
    }

    pub fn lock(&self) -> Result<LockGuard, ManagerError> {
        acquire_lock(&self.config.lock_path)
    }

    pub async fn install(&self) -> Result<InstallRecord, ManagerError> {
        let _guard = self.lock()?;
        if self.store.load()?.is_some() {
            return Err(ManagerError::AlreadyInstalled);
        }

        if let Some(user) = self.config.service_user.as_deref() {
            provision::ensure_service_user(user)?;
        }
        for dir in [&self.config.install_dir, &self.config.data_dir] {
            std::fs::create_dir_all(dir).io_context(|| format!("creating {}", dir.display()))?;
        }

        let release = self.releases.latest().await?;
        let artifact_path = self.fetch_artifact(&release).await?;

        if provision::write_default_server_config(&self.config)? {
            info!("wrote default config {}", self.config.config_path.display());
        }
        if let Some(user) = self.config.service_user.as_deref() {
            provision::hand_over(
                user,
                &[&self.config.install_dir, &self.config.data_dir],
            );
        }

        let record = InstallRecord {
            artifact_path,
            artifact_name: release.asset_name.clone(),
            artifact_version: release.version.clone(),
            pid_path: self.config.pid_path.clone(),
            installed_at: now_rfc3339(),
            updated_at: None,
        };
        self.store.save(&record)?;
        info!("installed {} {}", record.artifact_name, record.artifact_version);
        Ok(record)
    }

    pub fn start(&self) -> Result<u32, ManagerError> {
        let _guard = self.lock()?;
        self.start_locked()
    }

    pub(crate) fn start_locked(&self) -> Result<u32, ManagerError> {
        let record = self.store.require()?;
        let pid_path = self.pid_path(Some(&record));

        if let Some(pid) = read_pid(&pid_path) {
            if self.supervisor.is_alive(pid) {
                return Err(ManagerError::AlreadyRunning { pid });
            }
            warn!("removing stale pid file {} (pid {pid} is gone)", pid_path.display());
            remove_pid(&pid_path)?;
        }

        if !record.artifact_path.is_file() {
            return Err(ManagerError::Config(format!(
                "recorded artifact {} is missing; run update or reinstall",
                record.artifact_path.display()
            )));
        }
        std::fs::create_dir_all(&self.config.data_dir)
            .io_context(|| format!("creating {}", self.config.data_dir.display()))?;

        let spec = LaunchSpec::for_artifact(&self.config, &record.artifact_path);
        let pid = self.supervisor.spawn(&spec)?;
        write_pid(&pid_path, pid)?;
        info!("server started (pid {pid})");
        Ok(pid)
    }

    /// Returns the pid that was stopped.
    pub async fn stop(&self) -> Result<u32, ManagerError> {
        let _guard = self.lock()?;
        self.stop_locked().await
    }

    pub(crate) async fn stop_locked(&self) -> Result<u32, ManagerError> {
        let record = self.store.require()?;
        let pid_path = self.pid_path(Some(&record));

        let Some(pid) = read_pid(&pid_path) else {
            return Err(ManagerError::AlreadyStopped);
        };
        if !self.supervisor.is_alive(pid) {
            warn!("removing stale pid file {} (pid {pid} is gone)", pid_path.display());
            remove_pid(&pid_path)?;
            return Err(ManagerError::AlreadyStopped);
        }

        self.supervisor.terminate(pid)?;
        if !self.wait_for_exit(pid).await {
            return Err(ManagerError::StillRunning {
                pid,
                waited_secs: self.config.stop_timeout_secs,
            });
        }
        remove_pid(&pid_path)?;
        info!("server stopped (pid {pid})");
        Ok(pid)
    }

    async fn wait_for_exit(&self, pid: u32) -> bool {
        let deadline = Instant::now() + self.config.stop_timeout();
        loop {
            if !self.supervisor.is_alive(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("pid {pid} still alive after {}s", self.config.stop_timeout_secs);
                return false;
            }
            sleep(STOP_POLL_INTERVAL).await;
        }
    }

    pub fn status(&self) -> Result<ServerStatus, ManagerError> {
        let record = self.store.load()?;
        let pid_path = self.pid_path(record.as_ref());
        Ok(match read_pid(&pid_path) {
            Some(pid) if self.supervisor.is_alive(pid) => ServerStatus::Online { pid },
            _ => ServerStatus::Offline,
        })
    }

    pub async fn restart(&self) -> Result<u32, ManagerError> {
        let _guard = self.lock()?;
        self.stop_tolerant().await?;
        self.start_locked()
    }

    /// `stop_locked` with AlreadyStopped folded into success.
    pub(crate) async fn stop_tolerant(&self) -> Result<Option<u32>, ManagerError> {
        match self.stop_locked().await {
            Ok(pid) => Ok(Some(pid)),
            Err(ManagerError::AlreadyStopped) => {
                info!("server was not running");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn update(&self) -> Result<UpdateOutcome, ManagerError> {
        let _guard = self.lock()?;
        let record = self.store.require()?;

        let release = self.releases.latest().await?;
        if release.is_same_artifact(&record.artifact_version, &record.artifact_name) {
            warn!("no update available ({} is current)", record.artifact_version);
            return Ok(UpdateOutcome::AlreadyCurrent {
                version: record.artifact_version,
            });
        }

        let artifact_path = self.fetch_artifact(&release).await?;
        let updated = InstallRecord {
            artifact_path: artifact_path.clone(),
            artifact_name: release.asset_name.clone(),
            artifact_version: release.version.clone(),
            updated_at: Some(now_rfc3339()),
            ..record.clone()
        };
        self.store.save(&updated)?;

        if record.artifact_path != artifact_path {
            if let Err(err) = remove_file_if_exists(&record.artifact_path) {
                warn!("new release is active but the old artifact remains: {err}");
            }
        }

        let server_running = matches!(self.status()?, ServerStatus::Online { .. });
        info!("updated {} -> {}", record.artifact_version, release.version);
        Ok(UpdateOutcome::Updated {
            from: record.artifact_version,
            to: release.version,
            artifact_path,
            server_running,
        })
    }

    pub async fn uninstall(&self) -> Result<(), ManagerError> {
        let _guard = self.lock()?;
        let record = self.store.require()?;
        self.stop_tolerant().await?;

        remove_file_if_exists(&record.artifact_path)?;
        for dir in [&self.config.install_dir, &self.config.data_dir] {
            remove_dir_if_exists(dir)?;
        }
        for file in [
            &self.config.config_path,
            &record.pid_path,
            &self.config.pid_path,
            &self.config.log_path,
        ] {
            remove_file_if_exists(file)?;
        }
        self.store.clear()?;
        info!("uninstalled {}", record.artifact_name);
        Ok(())
    }

    /// Download next to the final location, then rename into place.
    async fn fetch_artifact(&self, release: &Release) -> Result<PathBuf, ManagerError> {
        let file_name = release.file_name()?;
        let dest = self.config.install_dir.join(file_name);
        let part = dest.with_file_name(format!("{file_name}.part"));
        if let Err(err) = self.releases.download(release, &part).await {
            let _ = std::fs::remove_file(&part);
            return Err(err);
        }
        std::fs::rename(&part, &dest)
            .io_context(|| format!("moving {} into place", dest.display()))?;
        Ok(dest)
    }

    fn pid_path(&self, record: Option<&InstallRecord>) -> PathBuf {
        record
            .map(|record| record.pid_path.clone())
            .unwrap_or_else(|| self.config.pid_path.clone())
    }
}

fn now_rfc3339() -> String {
    chrono::Local::now().to_rfc3339()
}
