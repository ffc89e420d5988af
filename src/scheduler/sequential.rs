//! Sequential scheduler
//!
//! One profile at a time, full-screen, with a short pause after each
//! launch and a caller-controlled gate before moving on. This is the
//! supervised path for first-time profile setup (manual logins, cookie
//! warming) where a human decides when a profile is done.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::actions::Flow;
use crate::context::{CancelToken, RunContext};
use crate::error::{FleetError, SkipReason};
use crate::matrix::WindowRect;
use crate::profile::Profile;
use crate::session::{SessionHandler, SessionLauncher};

use super::RunReport;

/// Pause after each launch so the browser settles before the operator
/// starts interacting with it.
const POST_LAUNCH_PAUSE: Duration = Duration::from_secs(5);

/// Decides when the current profile is finished and the run may advance.
#[async_trait]
pub trait Gate: Send + Sync {
    async fn wait(&self, profile: &Profile);
}

/// Advance immediately. Useful for unattended setup runs and tests.
pub struct NoGate;

#[async_trait]
impl Gate for NoGate {
    async fn wait(&self, _profile: &Profile) {}
}

/// Advance after a fixed dwell time per profile.
pub struct TimedGate(pub Duration);

#[async_trait]
impl Gate for TimedGate {
    async fn wait(&self, _profile: &Profile) {
        tokio::time::sleep(self.0).await;
    }
}

pub struct SequentialScheduler {
    launcher: Arc<SessionLauncher>,
    cancel: CancelToken,
}

impl SequentialScheduler {
    pub fn new(launcher: Arc<SessionLauncher>, cancel: CancelToken) -> Self {
        Self { launcher, cancel }
    }

    /// Walk the profiles in order, strictly one session at a time.
    pub async fn run(
        &self,
        ctx: &RunContext,
        profiles: Vec<Profile>,
        handler: Arc<dyn SessionHandler>,
        gate: &dyn Gate,
    ) -> RunReport {
        let mut report = RunReport::default();
        let window = WindowRect::fullscreen(ctx.config.screen);

        for profile in profiles {
            if self.cancel.is_cancelled() {
                report.record_skipped(profile.name, SkipReason::Cancelled);
                continue;
            }

            let mut session = match self.launcher.launch(ctx, &profile, window).await {
                Ok(session) => session,
                Err(FleetError::LockConflict { tool }) => {
                    warn!("[{}] held by live foreign process ({})", profile.name, tool);
                    report.record_skipped(profile.name, SkipReason::ForeignLock { tool });
                    continue;
                }
                Err(e) => {
                    error!("[{}] launch failed: {}", profile.name, e);
                    report
                        .record_skipped(profile.name, SkipReason::LaunchFailed(e.to_string()));
                    continue;
                }
            };

            self.cancel.sleep(POST_LAUNCH_PAUSE).await;

            let outcome = match handler.invoke(&mut session, &profile).await {
                Ok(Flow::Continue) => None,
                Ok(Flow::Halt(message)) => {
                    info!("[{}] halted early: {}", profile.name, message);
                    None
                }
                Err(e) => {
                    error!("[{}] handler failed: {}", profile.name, e);
                    Some(SkipReason::HandlerFailed(e.to_string()))
                }
            };

            if outcome.is_none() && !self.cancel.is_cancelled() {
                gate.wait(&profile).await;
            }

            self.launcher.teardown(session).await;

            match outcome {
                None => report.record_completed(profile.name),
                Some(reason) => report.record_skipped(profile.name, reason),
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::proxy::ProxyResolver;
    use crate::session::{BrowserBackend, BrowserHandle, LaunchSpec, Session};
    use crate::FleetConfig;

    struct SoloHandle {
        active: Arc<AtomicUsize>,
        teardowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BrowserHandle for SoloHandle {
        fn driver_pid(&self) -> Option<u32> {
            None
        }

        async fn terminate(&mut self) -> Result<(), FleetError> {
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn screenshot(&mut self) -> Result<Vec<u8>, FleetError> {
            Ok(vec![])
        }
    }

    /// Backend that records launch order and rejects overlap outright.
    #[derive(Default)]
    struct SoloBackend {
        active: Arc<AtomicUsize>,
        teardowns: Arc<AtomicUsize>,
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl BrowserBackend for SoloBackend {
        async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn BrowserHandle>, FleetError> {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(FleetError::LaunchFailure("overlapping launch".into()));
            }
            self.order.lock().unwrap().push(spec.profile_name.clone());
            Ok(Box::new(SoloHandle {
                active: Arc::clone(&self.active),
                teardowns: Arc::clone(&self.teardowns),
            }))
        }
    }

    struct OkHandler;

    #[async_trait]
    impl SessionHandler for OkHandler {
        async fn invoke(&self, _: &mut Session, _: &Profile) -> Result<Flow, FleetError> {
            Ok(Flow::Continue)
        }
    }

    struct CountingGate(Arc<AtomicUsize>);

    #[async_trait]
    impl Gate for CountingGate {
        async fn wait(&self, _profile: &Profile) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fixture(dir: &std::path::Path, backend: SoloBackend) -> (RunContext, SequentialScheduler) {
        let config = FleetConfig { max_concurrent: 1, ..FleetConfig::default() };
        let ctx = RunContext::init(config, dir).unwrap();
        let resolver = Arc::new(ProxyResolver::direct_only(&ctx.extensions_dir));
        let launcher = Arc::new(SessionLauncher::new(Arc::new(backend), resolver));
        (ctx, SequentialScheduler::new(launcher, CancelToken::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn profiles_run_one_at_a_time_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SoloBackend::default();
        let order = Arc::clone(&backend.order);
        let teardowns = Arc::clone(&backend.teardowns);
        let (ctx, scheduler) = fixture(dir.path(), backend);

        let gate_hits = Arc::new(AtomicUsize::new(0));
        let gate = CountingGate(Arc::clone(&gate_hits));
        let report = scheduler
            .run(&ctx, Profile::numbered(3), Arc::new(OkHandler), &gate)
            .await;

        assert!(report.is_clean(), "skipped: {:?}", report.skipped);
        assert_eq!(*order.lock().unwrap(), vec!["1", "2", "3"]);
        assert_eq!(gate_hits.load(Ordering::SeqCst), 3);
        assert_eq!(teardowns.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_profiles_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = fixture(dir.path(), SoloBackend::default());
        let resolver = Arc::new(ProxyResolver::direct_only(&ctx.extensions_dir));
        let launcher = Arc::new(SessionLauncher::new(Arc::new(SoloBackend::default()), resolver));
        let cancel = CancelToken::new();
        cancel.cancel();
        let scheduler = SequentialScheduler::new(launcher, cancel);

        let report = scheduler
            .run(&ctx, Profile::numbered(2), Arc::new(OkHandler), &NoGate)
            .await;

        assert!(report.completed.is_empty());
        assert_eq!(report.skipped.len(), 2);
    }
}
