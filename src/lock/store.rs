//! Lock file store
//!
//! One small `KEY=VALUE` text file per locked profile, plus one per
//! orchestrating process. This is deliberately not a strict distributed
//! lock: a lock naming a dead process is reclaimed on sight, and a lock
//! older than the staleness threshold is reclaimed regardless of liveness.
//! The model assumes a single host.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use super::process::{is_alive, kill_tree};

pub const KEY_TOOL: &str = "TOOL";
pub const KEY_PYTHON_PID: &str = "PYTHONPID";
pub const KEY_CHROME_PID: &str = "CHROMEPID";

/// Normalize an identifier so lock contents stay parseable with a simple
/// line format: keep `[A-Za-z0-9_-]`, replace everything else with `_`.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Parsed contents of a profile lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub tool: Option<String>,
    pub owner_pid: Option<u32>,
    pub browser_pid: Option<u32>,
}

impl LockRecord {
    fn from_fields(fields: &BTreeMap<String, String>) -> Self {
        let pid = |key: &str| fields.get(key).and_then(|v| v.parse::<u32>().ok());
        Self {
            tool: fields.get(KEY_TOOL).cloned(),
            owner_pid: pid(KEY_PYTHON_PID),
            browser_pid: pid(KEY_CHROME_PID),
        }
    }
}

/// Outcome of evaluating a profile lock before a launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockDecision {
    /// No lock file exists.
    Free,
    /// A lock existed but was cleared; the launch proceeds.
    Reclaimed(ReclaimReason),
    /// A live foreign process holds the lock; the launch must be refused.
    HeldByOther { tool: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimReason {
    /// Older than the staleness threshold, liveness not consulted.
    Stale,
    /// Empty or unparseable contents.
    Unreadable,
    /// Held by this same tool installation.
    SameTool,
    /// The owning process is dead; any recorded browser was killed.
    DeadOwner,
}

/// Reads, writes and reconciles lock files under one directory.
#[derive(Debug, Clone)]
pub struct LockStore {
    dir: PathBuf,
    tool: String,
}

impl LockStore {
    pub fn new(dir: impl Into<PathBuf>, tool: &str) -> Self {
        Self { dir: dir.into(), tool: sanitize(tool) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Path of the lock file guarding `profile`.
    pub fn profile_lock_path(&self, profile: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", sanitize(profile)))
    }

    /// Path of the process lock for an orchestrator PID.
    pub fn process_lock_path(&self, pid: u32) -> PathBuf {
        self.dir.join(format!("{pid}.pid"))
    }

    /// Parse a lock file into key/value pairs (keys uppercased). `None`
    /// when the file is missing, unreadable, or holds no parseable line.
    pub fn read(path: &Path) -> Option<BTreeMap<String, String>> {
        let content = std::fs::read_to_string(path).ok()?;
        let mut fields = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key.trim().to_uppercase(), value.trim().to_string());
            }
        }
        if fields.is_empty() {
            None
        } else {
            Some(fields)
        }
    }

    /// Write a lock file atomically (temp file + rename).
    fn write(path: &Path, lines: &[String]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, lines.join("\n") + "\n")?;
        std::fs::rename(&tmp, path)
    }

    /// Record ownership of a profile by this process and (optionally) the
    /// browser it spawned.
    pub fn write_profile_lock(
        &self,
        profile: &str,
        browser_pid: Option<u32>,
    ) -> std::io::Result<PathBuf> {
        let path = self.profile_lock_path(profile);
        let mut lines = Vec::with_capacity(3);
        if let Some(pid) = browser_pid {
            lines.push(format!("{KEY_CHROME_PID}={pid}"));
        }
        lines.push(format!("{KEY_TOOL}={}", self.tool));
        lines.push(format!("{KEY_PYTHON_PID}={}", std::process::id()));
        Self::write(&path, &lines)?;
        Ok(path)
    }

    /// Record that this orchestrator process is running.
    pub fn write_process_lock(&self) -> std::io::Result<PathBuf> {
        let path = self.process_lock_path(std::process::id());
        Self::write(&path, &[format!("{KEY_TOOL}={}", self.tool)])?;
        Ok(path)
    }

    /// Remove a lock file if present; failures are logged, never raised.
    pub fn remove(path: &Path) {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("failed to remove lock file {}: {}", path.display(), e);
            }
        }
    }

    /// True when the lock file is older than `max_age`.
    pub fn is_stale(path: &Path, max_age: Duration) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        let created = meta.created().or_else(|_| meta.modified());
        match created {
            Ok(t) => SystemTime::now()
                .duration_since(t)
                .map(|age| age > max_age)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Reconcile the lock guarding `profile` ahead of a launch.
    ///
    /// Refusal requires all three of: non-empty lock, foreign TOOL, and a
    /// live owning process. Every other state is self-healed: the lock is
    /// cleared and the launch proceeds.
    pub fn evaluate(&self, profile: &str, max_age: Duration) -> LockDecision {
        let path = self.profile_lock_path(profile);
        if !path.exists() {
            return LockDecision::Free;
        }

        if Self::is_stale(&path, max_age) {
            info!("[{}] lock exceeded staleness threshold, reclaiming", profile);
            Self::remove(&path);
            return LockDecision::Reclaimed(ReclaimReason::Stale);
        }

        let Some(fields) = Self::read(&path) else {
            Self::remove(&path);
            return LockDecision::Reclaimed(ReclaimReason::Unreadable);
        };
        let record = LockRecord::from_fields(&fields);

        let owner_alive = record.owner_pid.map(is_alive).unwrap_or(false);
        let foreign = record.tool.as_deref().is_some_and(|t| t != self.tool);

        if foreign && owner_alive {
            let tool = record.tool.unwrap_or_default();
            return LockDecision::HeldByOther { tool };
        }

        if !owner_alive {
            if let Some(pid) = record.browser_pid {
                info!("[{}] owner dead, killing leftover browser pid {}", profile, pid);
                kill_tree(pid);
            }
            Self::remove(&path);
            return LockDecision::Reclaimed(ReclaimReason::DeadOwner);
        }

        // Same tool, live process. The scheduler never runs one profile
        // twice concurrently, so this is residue from a previous run that
        // reused our PID range; clear it and proceed.
        Self::remove(&path);
        LockDecision::Reclaimed(ReclaimReason::SameTool)
    }

    /// Startup sweep: drop process locks of dead orchestrators and reclaim
    /// profile locks whose owner is gone, force-killing any recorded
    /// browser process tree first. Returns (process locks removed, profile
    /// locks reclaimed).
    pub fn sweep(&self) -> (usize, usize) {
        let mut dead_pids = 0usize;
        let mut reclaimed = 0usize;

        for (path, ext) in self.lock_files() {
            match ext.as_str() {
                "pid" => {
                    let stem_pid = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(|s| s.parse::<u32>().ok());
                    match stem_pid {
                        Some(pid) if pid == std::process::id() => {}
                        Some(pid) if is_alive(pid) => {}
                        _ => {
                            Self::remove(&path);
                            dead_pids += 1;
                        }
                    }
                }
                "lock" => {
                    let Some(fields) = Self::read(&path) else {
                        Self::remove(&path);
                        reclaimed += 1;
                        continue;
                    };
                    let record = LockRecord::from_fields(&fields);
                    if record.owner_pid.map(is_alive).unwrap_or(false) {
                        continue;
                    }
                    if let Some(pid) = record.browser_pid {
                        info!("sweeping orphaned browser pid {} ({})", pid, path.display());
                        kill_tree(pid);
                    }
                    Self::remove(&path);
                    reclaimed += 1;
                }
                _ => {}
            }
        }

        if dead_pids > 0 || reclaimed > 0 {
            info!("lock sweep: {} dead process locks, {} orphaned profile locks", dead_pids, reclaimed);
        }
        (dead_pids, reclaimed)
    }

    /// True when another live process of this same installation holds a
    /// process lock here.
    pub fn is_tool_already_running(&self) -> bool {
        for (path, ext) in self.lock_files() {
            if ext != "pid" {
                continue;
            }
            let Some(pid) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            if pid == std::process::id() || !is_alive(pid) {
                continue;
            }
            if Self::read(&path)
                .and_then(|f| f.get(KEY_TOOL).cloned())
                .is_some_and(|t| t == self.tool)
            {
                return true;
            }
        }
        false
    }

    /// Tool names of other live orchestrator processes registered here.
    pub fn foreign_process_tools(&self) -> Vec<String> {
        let mut tools = Vec::new();
        for (path, ext) in self.lock_files() {
            if ext != "pid" {
                continue;
            }
            let Some(pid) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            if pid == std::process::id() || !is_alive(pid) {
                continue;
            }
            if let Some(tool) = Self::read(&path).and_then(|f| f.get(KEY_TOOL).cloned()) {
                if tool != self.tool && !tools.contains(&tool) {
                    tools.push(tool);
                }
            }
        }
        tools
    }

    /// Profile locks currently held by a live process, with the owning
    /// tool name. Used to report which profiles are busy elsewhere.
    pub fn active_profile_locks(&self) -> Vec<(String, String)> {
        let mut active = Vec::new();
        for (path, ext) in self.lock_files() {
            if ext != "lock" {
                continue;
            }
            let Some(fields) = Self::read(&path) else { continue };
            let record = LockRecord::from_fields(&fields);
            if record.owner_pid.map(is_alive).unwrap_or(false) {
                let profile = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                active.push((profile, record.tool.unwrap_or_default()));
            }
        }
        active
    }

    fn lock_files(&self) -> Vec<(PathBuf, String)> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|e| {
                let path = e.path();
                let ext = path.extension()?.to_str()?.to_string();
                Some((path, ext))
            })
            .collect()
    }
}
