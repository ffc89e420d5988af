//! Error types shared across the fleet

use thiserror::Error;

/// Errors raised while coordinating browser sessions.
///
/// Per-profile failures are contained by the scheduler: none of these abort
/// the run loop or affect sibling profiles.
#[derive(Error, Debug)]
pub enum FleetError {
    /// The profile is locked by a live process of a different tool
    /// installation. Non-fatal: the profile is skipped.
    #[error("profile locked by tool [{tool}]")]
    LockConflict { tool: String },

    #[error("failed to launch browser: {0}")]
    LaunchFailure(String),

    /// The browser process did not reach a ready state within the
    /// configured startup timeout.
    #[error("browser startup timed out after {0}s")]
    StartupTimeout(u64),

    #[error("screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("teardown failed: {0}")]
    Teardown(String),

    #[error("profile deletion failed: {0}")]
    ProfileDelete(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a profile was skipped, reported by name at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A live foreign process holds the profile lock.
    ForeignLock { tool: String },
    /// The browser failed to start or did not become ready in time.
    LaunchFailed(String),
    /// Caller-supplied logic returned an error mid-run (the session was
    /// still torn down normally).
    HandlerFailed(String),
    /// The run was cancelled before this profile was submitted.
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ForeignLock { tool } => write!(f, "locked by tool [{tool}]"),
            SkipReason::LaunchFailed(e) => write!(f, "launch failed: {e}"),
            SkipReason::HandlerFailed(e) => write!(f, "handler failed: {e}"),
            SkipReason::Cancelled => write!(f, "run cancelled"),
        }
    }
}
