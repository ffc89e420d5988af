//! Session launcher
//!
//! Drives the fixed per-profile sequence: lock check, preference repair,
//! proxy resolution, browser start, real-browser-PID discovery, lock
//! write. Teardown runs the sequence in reverse and never fails.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::context::RunContext;
use crate::error::FleetError;
use crate::lock::{find_browser_child, kill_tree, LockDecision};
use crate::matrix::WindowRect;
use crate::notify::NotificationSink;
use crate::profile::Profile;
use crate::proxy::ProxyResolver;

use super::{BrowserBackend, LaunchSpec, Session};

pub struct SessionLauncher {
    backend: Arc<dyn BrowserBackend>,
    resolver: Arc<ProxyResolver>,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl SessionLauncher {
    pub fn new(backend: Arc<dyn BrowserBackend>, resolver: Arc<ProxyResolver>) -> Self {
        Self { backend, resolver, sink: None }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Launch one session for `profile` at the given window placement.
    ///
    /// Fails with `LockConflict` when a live foreign process holds the
    /// profile, `StartupTimeout` when the browser does not come up in
    /// time, and `LaunchFailure` for everything else. Proxy trouble is
    /// not a failure; the resolver degrades on its own.
    pub async fn launch(
        &self,
        ctx: &RunContext,
        profile: &Profile,
        window: WindowRect,
    ) -> Result<Session, FleetError> {
        let name = &profile.name;
        let max_age = Duration::from_secs(ctx.config.lock_max_age_secs);

        match ctx.locks.evaluate(name, max_age) {
            LockDecision::HeldByOther { tool } => {
                return Err(FleetError::LockConflict { tool });
            }
            LockDecision::Reclaimed(reason) => {
                info!("[{}] reclaimed previous lock ({:?})", name, reason);
            }
            LockDecision::Free => {}
        }

        let user_data_dir = ctx.profile_dir(name);
        std::fs::create_dir_all(&user_data_dir)?;
        repair_exit_type(&user_data_dir);

        let proxy = self
            .resolver
            .resolve(name, profile.proxy_info.as_deref())
            .await?;

        let spec = LaunchSpec {
            profile_name: name.clone(),
            user_data_dir,
            headless: ctx.config.headless,
            disable_gpu: ctx.config.disable_gpu,
            proxy,
            extensions: ctx.config.extensions.clone(),
            window,
        };

        let startup = Duration::from_secs(ctx.config.startup_timeout_secs);
        let handle = match tokio::time::timeout(startup, self.backend.launch(&spec)).await {
            Ok(result) => result?,
            Err(_) => return Err(FleetError::StartupTimeout(ctx.config.startup_timeout_secs)),
        };

        // The driver shim often spawns the real browser as a child; the
        // lock must name the browser itself so a later reclaim kills the
        // right tree.
        let browser_pid = handle
            .driver_pid()
            .map(|pid| find_browser_child(pid).unwrap_or(pid));

        let lock_path = ctx.locks.write_profile_lock(name, browser_pid)?;
        info!("[{}] session up (browser pid {:?})", name, browser_pid);

        Ok(Session::new(
            profile.clone(),
            window,
            handle,
            browser_pid,
            lock_path,
            ctx.snapshot_dir.clone(),
            self.sink.clone(),
        ))
    }

    /// Tear a session down: graceful terminate, force-kill fallback, lock
    /// removal. Consumes the session so teardown happens exactly once, and
    /// never reports an error because nothing upstream can act on one.
    pub async fn teardown(&self, mut session: Session) {
        let name = session.profile.name.clone();
        if let Err(e) = session.handle.terminate().await {
            warn!("[{}] graceful terminate failed ({}), force-killing", name, e);
            if let Some(pid) = session.browser_pid {
                kill_tree(pid);
            }
        }
        crate::lock::LockStore::remove(&session.lock_path);
        info!("[{}] session torn down", name);
    }
}

/// Clear the "unclean shutdown" marker a crashed browser leaves in its
/// persisted preferences, so the next launch does not prompt to restore.
/// Handles both the nested (`profile.exit_type`) and flat layouts.
fn repair_exit_type(user_data_dir: &Path) {
    let path = user_data_dir.join("Default").join("Preferences");
    let Ok(text) = std::fs::read_to_string(&path) else {
        return;
    };
    let Ok(mut prefs) = serde_json::from_str::<serde_json::Value>(&text) else {
        return;
    };

    let mut changed = false;
    for pointer in ["/profile/exit_type", "/exit_type"] {
        if let Some(slot) = prefs.pointer_mut(pointer) {
            if slot.as_str() != Some("Normal") {
                *slot = serde_json::Value::String("Normal".to_string());
                changed = true;
            }
        }
    }

    if changed {
        match serde_json::to_string(&prefs) {
            Ok(out) => {
                if let Err(e) = std::fs::write(&path, out) {
                    warn!("could not repair preferences at {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("could not serialize repaired preferences: {}", e),
        }
    }
}
