//! Browser session lifecycle
//!
//! A [`Session`] is one locked profile driving one live browser. Sessions
//! are created by the [`SessionLauncher`] and consumed by its teardown, so
//! a launched session cannot be torn down twice.

mod backend;
mod handler;
mod launcher;

pub use backend::{BrowserBackend, BrowserHandle, LaunchSpec};
pub use handler::SessionHandler;
pub use launcher::SessionLauncher;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use crate::actions::Flow;
use crate::error::FleetError;
use crate::lock::sanitize;
use crate::matrix::WindowRect;
use crate::notify::NotificationSink;
use crate::profile::Profile;

/// One live browser bound to one locked profile.
pub struct Session {
    pub profile: Profile,
    pub window: WindowRect,
    pub(crate) handle: Box<dyn BrowserHandle>,
    /// PID of the actual browser process (not the driver shim).
    pub(crate) browser_pid: Option<u32>,
    pub(crate) lock_path: PathBuf,
    snapshot_dir: PathBuf,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl Session {
    pub(crate) fn new(
        profile: Profile,
        window: WindowRect,
        handle: Box<dyn BrowserHandle>,
        browser_pid: Option<u32>,
        lock_path: PathBuf,
        snapshot_dir: PathBuf,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        Self { profile, window, handle, browser_pid, lock_path, snapshot_dir, sink }
    }

    pub fn browser_pid(&self) -> Option<u32> {
        self.browser_pid
    }

    /// Capture the current state as PNG bytes.
    pub async fn screenshot(&mut self) -> Result<Vec<u8>, FleetError> {
        self.handle.screenshot().await
    }

    /// Record the current state and signal an intentional early exit.
    ///
    /// Writes a timestamped PNG to the snapshot directory and pushes it to
    /// the notification sink when one is attached. Capture or delivery
    /// failures are logged; the halt signal is returned regardless, since
    /// the caller has already decided to stop.
    pub async fn snapshot(&mut self, message: impl Into<String>) -> Flow {
        let message = message.into();
        let png = match self.handle.screenshot().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("[{}] snapshot capture failed: {}", self.profile.name, e);
                None
            }
        };

        if let Some(bytes) = &png {
            let stamp = Local::now().format("%Y%m%d_%H%M%S");
            let path = self
                .snapshot_dir
                .join(format!("{}_{}.png", sanitize(&self.profile.name), stamp));
            match std::fs::write(&path, bytes) {
                Ok(()) => info!("[{}] snapshot written to {}", self.profile.name, path.display()),
                Err(e) => warn!("[{}] snapshot write failed: {}", self.profile.name, e),
            }
        }

        if let Some(sink) = &self.sink {
            let delivered = sink.send(&message, png.as_deref()).await;
            if !delivered {
                warn!("[{}] snapshot notification not delivered", self.profile.name);
            }
        }

        Flow::Halt(message)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("profile", &self.profile.name)
            .field("browser_pid", &self.browser_pid)
            .field("lock_path", &self.lock_path)
            .finish()
    }
}
