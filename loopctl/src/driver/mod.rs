//! Driver orchestration: build sequencer and improve loop.
//!
//! Both drivers share the same shape. Pre-flight checks run first and fail
//! with a plain error (no record, nothing started). Then the scope lock is
//! taken for the whole run, a [`session::Session`] drives the worker, and
//! exactly one run record is archived before the lock is released.

pub mod build;
pub mod improve;
pub mod session;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::core::record::RunRecord;
use crate::io::archive::{ArchiveOutcome, RunArchiver};
use crate::io::config::{
    ConfigResolver, ConfigTiers, DEFAULT_NOTIFY_TIMEOUT_SECS, NOTIFY_TIMEOUT_SECS,
};
use crate::io::lock::LockManager;
use crate::io::paths::ControllerPaths;

pub use build::{BuildOptions, run_build};
pub use improve::{ImproveOptions, run_improve};

/// Services injected into both drivers.
pub struct Services<W, N> {
    pub paths: ControllerPaths,
    pub config: ConfigResolver,
    pub locks: LockManager,
    pub archiver: RunArchiver,
    pub worker: W,
    pub notifier: N,
}

impl<W, N> Services<W, N> {
    pub fn new(paths: ControllerPaths, config: ConfigResolver, worker: W, notifier: N) -> Self {
        Self {
            locks: LockManager::new(&paths.locks_dir),
            archiver: RunArchiver::new(&paths),
            paths,
            config,
            worker,
            notifier,
        }
    }
}

/// Load the config tiers for a work directory.
pub fn load_config(paths: &ControllerPaths, group: Option<&Path>) -> ConfigResolver {
    ConfigResolver::load(&ConfigTiers::standard(&paths.config_path, group))
}

/// Notification timeout from `notify.timeout_secs`.
pub fn notify_timeout(config: &ConfigResolver) -> Result<Duration> {
    let secs = config
        .resolve(NOTIFY_TIMEOUT_SECS, DEFAULT_NOTIFY_TIMEOUT_SECS)
        .as_positive_u32()
        .context("notification timeout")?;
    Ok(Duration::from_secs(u64::from(secs)))
}

/// Result of a driver run that got past pre-flight.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub record: RunRecord,
    pub exit_code: i32,
    pub archive: ArchiveOutcome,
}
