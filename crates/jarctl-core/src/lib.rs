//! Lifecycle and backup management for a single self-hosted Java server.
//!
//! [`LifecycleManager`] moves the server between not-installed, stopped and
//! running; [`BackupManager`] snapshots and restores its data directory.
//! Process control and release lookup sit behind [`ProcessSupervisor`] and
//! [`ReleaseSource`] so both can be swapped out.

pub mod backup;
pub mod config;
pub mod errors;
mod fsutil;
pub mod lifecycle;
pub mod lock;
pub mod pidfile;
pub mod release;
pub mod state;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use backup::{BackupEntry, BackupManager, RestoreReport};
pub use config::ManagerConfig;
pub use errors::ManagerError;
pub use lifecycle::{LifecycleManager, ServerStatus, UpdateOutcome};
pub use release::{HttpReleaseSource, Release, ReleaseSource};
pub use state::{InstallRecord, StateStore};
pub use supervisor::{LaunchSpec, ProcessSupervisor, SystemSupervisor};
