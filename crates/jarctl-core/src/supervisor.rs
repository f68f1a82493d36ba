use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::config::{ManagerConfig, ensure_parent};
use crate::errors::ManagerError;

/// Everything needed to launch the server detached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub log_path: PathBuf,
    pub run_as: Option<String>,
}

impl LaunchSpec {
    pub fn for_artifact(config: &ManagerConfig, artifact: &std::path::Path) -> Self {
        let mut args = config.jvm_args.clone();
        args.push("-jar".to_string());
        args.push(artifact.to_string_lossy().to_string());
        args.extend(config.server_args.iter().cloned());
        Self {
            program: config.java_command.clone(),
            args,
            cwd: config.data_dir.clone(),
            log_path: config.log_path.clone(),
            run_as: config.service_user.clone(),
        }
    }
}

/// Start, signal and observe the managed process. The manager never holds
/// a child handle; it only knows pids.
pub trait ProcessSupervisor: Send + Sync {
    fn spawn(&self, spec: &LaunchSpec) -> Result<u32, ManagerError>;

    /// Ask the process to exit gracefully.
    fn terminate(&self, pid: u32) -> Result<(), ManagerError>;

    fn is_alive(&self, pid: u32) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSupervisor;

impl ProcessSupervisor for SystemSupervisor {
    fn spawn(&self, spec: &LaunchSpec) -> Result<u32, ManagerError> {
        use std::os::unix::process::CommandExt;

        ensure_parent(&spec.log_path)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_path)
            .map_err(|err| ManagerError::io(format!("opening {}", spec.log_path.display()), err))?;
        let log_err = log
            .try_clone()
            .map_err(|err| ManagerError::io("duplicating log handle", err))?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            // own process group so the server survives the CLI's terminal
            .process_group(0);

        if let Some(user) = spec.run_as.as_deref() {
            if is_root() {
                let (uid, gid) = lookup_user(user).ok_or_else(|| {
                    ManagerError::Config(format!("service user '{user}' does not exist"))
                })?;
                cmd.uid(uid).gid(gid);
            } else {
                debug!("not root; launching as the current user instead of {user}");
            }
        }

        let child = cmd
            .spawn()
            .map_err(|err| ManagerError::io(format!("spawning {}", spec.program), err))?;
        let pid = child.id();
        info!("spawned {} (pid {pid})", spec.program);
        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> Result<(), ManagerError> {
        let pid = to_pid(pid)?;
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            return Err(ManagerError::io(format!("signalling pid {pid}"), err));
        }
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = to_pid(pid) else {
            return false;
        };
        let rc = unsafe { libc::kill(pid, 0) };
        let exists = rc == 0
            || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
        exists && !is_zombie(pid)
    }
}

fn to_pid(pid: u32) -> Result<libc::pid_t, ManagerError> {
    libc::pid_t::try_from(pid)
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| ManagerError::Config(format!("invalid pid {pid}")))
}

/// An exited child nobody reaped still answers `kill(pid, 0)`.
#[cfg(target_os = "linux")]
fn is_zombie(pid: libc::pid_t) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // state is the first field after the parenthesised command name
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(|state| state == "Z")
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: libc::pid_t) -> bool {
    false
}

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Resolve a user name to `(uid, gid)` via the system passwd database.
pub fn lookup_user(name: &str) -> Option<(u32, u32)> {
    let name = std::ffi::CString::new(name).ok()?;
    let entry = unsafe { libc::getpwnam(name.as_ptr()) };
    if entry.is_null() {
        return None;
    }
    let entry = unsafe { &*entry };
    Some((entry.pw_uid, entry.pw_gid))
}
