//! Run context and cancellation
//!
//! Everything that used to be ambient state (working directory, lock
//! directory, tool identity) lives in an explicit `RunContext` value that
//! is created at run start, passed to every component, and torn down at
//! run end.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::{info, warn};

use crate::error::FleetError;
use crate::lock::{sanitize, LockDecision, LockStore};
use crate::FleetConfig;

/// Identity of this tool installation, written into every lock file.
/// Derived from the executable name so two differently named builds
/// sharing one machine do not steal each other's profiles.
pub static TOOL_ID: Lazy<String> = Lazy::new(|| {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .map(|s| sanitize(&s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "browserfleet".to_string())
});

/// Cooperative cancellation flag shared across scheduler and workers.
///
/// Cloning shares the flag. All scheduler waits go through [`sleep`],
/// which returns early when the token trips, so a cancel takes effect
/// within one tick rather than one full stagger or poll interval.
///
/// [`sleep`]: CancelToken::sleep
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on cancellation. Returns true
    /// if the full duration elapsed, false if cancelled first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        const TICK: Duration = Duration::from_millis(250);
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(TICK)).await;
        }
    }
}

/// Per-run state shared by launcher and schedulers.
#[derive(Debug)]
pub struct RunContext {
    pub config: FleetConfig,
    /// Root of all per-profile user-data directories.
    pub user_data_dir: PathBuf,
    /// Where proxy auth extension bundles are written.
    pub extensions_dir: PathBuf,
    /// Where halt snapshots are written.
    pub snapshot_dir: PathBuf,
    pub locks: LockStore,
    process_lock: PathBuf,
}

impl RunContext {
    /// Create the directory layout under `base_dir`, sweep stale locks
    /// left by dead runs, and register this process.
    pub fn init(config: FleetConfig, base_dir: impl Into<PathBuf>) -> Result<Self, FleetError> {
        let base = base_dir.into();
        let user_data_dir = base.join("profiles");
        let extensions_dir = base.join("extensions");
        let snapshot_dir = base.join("snapshots");
        for dir in [&base, &user_data_dir, &extensions_dir, &snapshot_dir] {
            std::fs::create_dir_all(dir)?;
        }

        let locks = LockStore::new(&base, &TOOL_ID);
        if locks.is_tool_already_running() {
            warn!("another instance of {} appears to be running", locks.tool());
        }
        locks.sweep();
        let process_lock = locks.write_process_lock()?;

        info!("run context ready at {} (tool {})", base.display(), locks.tool());
        Ok(Self {
            config,
            user_data_dir,
            extensions_dir,
            snapshot_dir,
            locks,
            process_lock,
        })
    }

    /// User-data directory for one profile.
    pub fn profile_dir(&self, profile_name: &str) -> PathBuf {
        self.user_data_dir.join(sanitize(profile_name))
    }

    /// Profiles currently locked by live processes, with the owning tool.
    pub fn active_locks(&self) -> Vec<(String, String)> {
        self.locks.active_profile_locks()
    }

    /// Other tools with a live orchestrator process registered in the
    /// lock directory.
    pub fn foreign_tools_running(&self) -> Vec<String> {
        self.locks.foreign_process_tools()
    }

    /// Delete a profile's user-data directory, reconciling its lock first.
    /// Refused while a live foreign process holds the profile.
    pub async fn delete_profile(&self, profile_name: &str) -> Result<(), FleetError> {
        let max_age = Duration::from_secs(self.config.lock_max_age_secs);
        if let LockDecision::HeldByOther { tool } = self.locks.evaluate(profile_name, max_age) {
            return Err(FleetError::ProfileDelete(format!(
                "{profile_name} is in use by {tool}"
            )));
        }

        let dir = self.profile_dir(profile_name);
        if !dir.exists() {
            return Ok(());
        }
        // One retry: the browser may still be flushing files right after
        // teardown.
        if let Err(first) = std::fs::remove_dir_all(&dir) {
            warn!("[{}] profile delete failed ({}), retrying", profile_name, first);
            tokio::time::sleep(Duration::from_millis(500)).await;
            std::fs::remove_dir_all(&dir)
                .map_err(|e| FleetError::ProfileDelete(format!("{}: {e}", dir.display())))?;
        }
        info!("[{}] profile data removed", profile_name);
        Ok(())
    }

    /// Unregister this process. Profile locks are removed per session by
    /// teardown; this only drops the process lock.
    pub fn teardown(&self) {
        LockStore::remove(&self.process_lock);
    }

    pub fn process_lock_path(&self) -> &Path {
        &self.process_lock
    }
}
