//! In-memory stand-ins for the process table and the upstream release feed.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::ManagerConfig;
use crate::errors::ManagerError;
use crate::lifecycle::LifecycleManager;
use crate::release::{Release, ReleaseSource};
use crate::supervisor::{LaunchSpec, ProcessSupervisor};

#[derive(Default)]
pub struct FakeSupervisor {
    inner: Mutex<FakeProcesses>,
}

#[derive(Default)]
struct FakeProcesses {
    next_pid: u32,
    alive: BTreeSet<u32>,
    spawned: Vec<LaunchSpec>,
    ignore_sigterm: bool,
}

impl FakeSupervisor {
    pub fn spawn_count(&self) -> usize {
        self.inner.lock().unwrap().spawned.len()
    }

    pub fn last_spec(&self) -> Option<LaunchSpec> {
        self.inner.lock().unwrap().spawned.last().cloned()
    }

    /// Simulate the server dying on its own.
    pub fn crash(&self, pid: u32) {
        self.inner.lock().unwrap().alive.remove(&pid);
    }

    pub fn ignore_sigterm(&self) {
        self.inner.lock().unwrap().ignore_sigterm = true;
    }
}

impl ProcessSupervisor for FakeSupervisor {
    fn spawn(&self, spec: &LaunchSpec) -> Result<u32, ManagerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_pid += 1;
        let pid = 1000 + inner.next_pid;
        inner.alive.insert(pid);
        inner.spawned.push(spec.clone());
        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> Result<(), ManagerError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.ignore_sigterm {
            inner.alive.remove(&pid);
        }
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.inner.lock().unwrap().alive.contains(&pid)
    }
}

/// Publishes whatever version the test sets; downloads write
/// `artifact:<version>` as the file body.
pub struct FakeReleases {
    current: Mutex<Result<Release, String>>,
    downloads: Mutex<usize>,
}

impl FakeReleases {
    pub fn publishing(version: &str) -> Self {
        Self {
            current: Mutex::new(Ok(release(version))),
            downloads: Mutex::new(0),
        }
    }

    pub fn publish(&self, version: &str) {
        *self.current.lock().unwrap() = Ok(release(version));
    }

    /// Publish `version` under an arbitrary asset file name.
    pub fn publish_asset(&self, version: &str, asset_name: &str) {
        let mut release = release(version);
        release.asset_name = asset_name.to_string();
        *self.current.lock().unwrap() = Ok(release);
    }

    pub fn go_offline(&self) {
        *self.current.lock().unwrap() = Err("connection refused".to_string());
    }

    pub fn download_count(&self) -> usize {
        *self.downloads.lock().unwrap()
    }
}

fn release(version: &str) -> Release {
    Release {
        version: version.to_string(),
        asset_name: format!("server-{version}.jar"),
        download_url: format!("https://releases.invalid/server-{version}.jar"),
        sha256: None,
    }
}

#[async_trait]
impl ReleaseSource for FakeReleases {
    async fn latest(&self) -> Result<Release, ManagerError> {
        self.current
            .lock()
            .unwrap()
            .clone()
            .map_err(ManagerError::Network)
    }

    async fn download(&self, release: &Release, dest: &Path) -> Result<(), ManagerError> {
        *self.downloads.lock().unwrap() += 1;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(dest, format!("artifact:{}", release.version)).unwrap();
        Ok(())
    }
}

pub type FakeManager = LifecycleManager<FakeSupervisor, FakeReleases>;

pub fn fake_manager(root: &Path) -> FakeManager {
    LifecycleManager::new(
        ManagerConfig::rooted_at(root),
        FakeSupervisor::default(),
        FakeReleases::publishing("1.0.0"),
    )
}
