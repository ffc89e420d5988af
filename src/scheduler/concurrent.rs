//! Concurrent scheduler
//!
//! FIFO work queue in front of a bounded worker pool. Admission is coupled
//! to placement: the head profile is dequeued only once a matrix slot is
//! reserved for it, so a session never starts without a screen region.
//! Launches are staggered to avoid thundering the browser backend.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::actions::Flow;
use crate::context::{CancelToken, RunContext};
use crate::error::{FleetError, SkipReason};
use crate::matrix::PositionMatrix;
use crate::profile::Profile;
use crate::session::{SessionHandler, SessionLauncher};

use super::RunReport;

pub struct ConcurrentScheduler {
    launcher: Arc<SessionLauncher>,
    cancel: CancelToken,
}

impl ConcurrentScheduler {
    pub fn new(launcher: Arc<SessionLauncher>, cancel: CancelToken) -> Self {
        Self { launcher, cancel }
    }

    /// Drain `profiles` through the worker pool. Always returns a full
    /// report; per-profile failures are recorded, never propagated.
    pub async fn run(
        &self,
        ctx: Arc<RunContext>,
        profiles: Vec<Profile>,
        handler: Arc<dyn SessionHandler>,
    ) -> RunReport {
        let max_concurrent = ctx.config.max_concurrent.max(1);
        let stagger = Duration::from_secs(ctx.config.stagger_secs);
        let poll = Duration::from_secs(ctx.config.slot_poll_secs);

        let matrix = Arc::new(Mutex::new(PositionMatrix::new(profiles.len(), max_concurrent)));
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut queue: VecDeque<Profile> = profiles.into();
        let mut workers: JoinSet<(String, Option<SkipReason>)> = JoinSet::new();
        let mut report = RunReport::default();

        info!("concurrent run: {} profiles, {} workers", queue.len(), max_concurrent);

        while !queue.is_empty() && !self.cancel.is_cancelled() {
            // Peek, don't pop: the head keeps its place until a slot opens.
            let head = match queue.front() {
                Some(p) => p.name.clone(),
                None => break,
            };

            let placement = {
                let mut grid = matrix.lock();
                grid.acquire(&head)
                    .map(|(row, col)| grid.placement(row, col, ctx.config.screen))
            };
            let Some(window) = placement else {
                self.cancel.sleep(poll).await;
                continue;
            };

            let profile = match queue.pop_front() {
                Some(p) => p,
                None => break,
            };
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                // Semaphore is never closed while the run lives.
                matrix.lock().release(&profile.name);
                break;
            };

            let launcher = Arc::clone(&self.launcher);
            let ctx = Arc::clone(&ctx);
            let handler = Arc::clone(&handler);
            let matrix = Arc::clone(&matrix);
            workers.spawn(async move {
                let name = profile.name.clone();
                let outcome = run_one(&launcher, &ctx, &profile, window, handler).await;
                matrix.lock().release(&name);
                drop(permit);
                (name, outcome)
            });

            self.cancel.sleep(stagger).await;
        }

        for profile in queue {
            report.record_skipped(profile.name, SkipReason::Cancelled);
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((name, None)) => report.record_completed(name),
                Ok((name, Some(reason))) => {
                    warn!("[{}] skipped: {}", name, reason);
                    report.record_skipped(name, reason);
                }
                Err(e) => error!("worker task failed to join: {}", e),
            }
        }

        info!(
            "concurrent run finished: {} completed, {} skipped",
            report.completed.len(),
            report.skipped.len()
        );
        report
    }
}

/// One profile's full lifecycle. Every path that launched a session funnels
/// into exactly one teardown.
async fn run_one(
    launcher: &SessionLauncher,
    ctx: &RunContext,
    profile: &Profile,
    window: crate::matrix::WindowRect,
    handler: Arc<dyn SessionHandler>,
) -> Option<SkipReason> {
    let mut session = match launcher.launch(ctx, profile, window).await {
        Ok(session) => session,
        Err(FleetError::LockConflict { tool }) => {
            warn!("[{}] held by live foreign process ({})", profile.name, tool);
            return Some(SkipReason::ForeignLock { tool });
        }
        Err(e) => {
            error!("[{}] launch failed: {}", profile.name, e);
            return Some(SkipReason::LaunchFailed(e.to_string()));
        }
    };

    let outcome = match handler.invoke(&mut session, profile).await {
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

    launcher.teardown(session).await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::session::{BrowserBackend, BrowserHandle, LaunchSpec, Session};
    use crate::proxy::ProxyResolver;
    use crate::FleetConfig;

    struct MockHandle {
        active: Arc<AtomicUsize>,
        teardowns: Arc<AtomicUsize>,
        name: String,
        live_names: Arc<Mutex<HashSet<String>>>,
    }

    #[async_trait]
    impl BrowserHandle for MockHandle {
        fn driver_pid(&self) -> Option<u32> {
            None
        }

        async fn terminate(&mut self) -> Result<(), FleetError> {
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            self.live_names.lock().remove(&self.name);
            Ok(())
        }

        async fn screenshot(&mut self) -> Result<Vec<u8>, FleetError> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct MockBackend {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        launches: Arc<AtomicUsize>,
        teardowns: Arc<AtomicUsize>,
        live_names: Arc<Mutex<HashSet<String>>>,
        duplicate_seen: Arc<AtomicBool>,
        fail_for: HashSet<String>,
        stall_for: HashSet<String>,
    }

    #[async_trait]
    impl BrowserBackend for MockBackend {
        async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn BrowserHandle>, FleetError> {
            if self.stall_for.contains(&spec.profile_name) {
                // Hangs forever; only the launcher's startup timeout ends it.
                std::future::pending::<()>().await;
            }
            if self.fail_for.contains(&spec.profile_name) {
                return Err(FleetError::LaunchFailure("refused by test".into()));
            }
            self.launches.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.live_names.lock().insert(spec.profile_name.clone()) {
                self.duplicate_seen.store(true, Ordering::SeqCst);
            }
            Ok(Box::new(MockHandle {
                active: Arc::clone(&self.active),
                teardowns: Arc::clone(&self.teardowns),
                name: spec.profile_name.clone(),
                live_names: Arc::clone(&self.live_names),
            }))
        }
    }

    struct DwellHandler(Duration);

    #[async_trait]
    impl SessionHandler for DwellHandler {
        async fn invoke(&self, _: &mut Session, _: &Profile) -> Result<Flow, FleetError> {
            tokio::time::sleep(self.0).await;
            Ok(Flow::Continue)
        }
    }

    struct FailingHandler {
        fail_for: &'static str,
    }

    #[async_trait]
    impl SessionHandler for FailingHandler {
        async fn invoke(&self, _: &mut Session, profile: &Profile) -> Result<Flow, FleetError> {
            if profile.name == self.fail_for {
                return Err(FleetError::LaunchFailure("handler blew up".into()));
            }
            Ok(Flow::Continue)
        }
    }

    fn test_config(max_concurrent: usize) -> FleetConfig {
        FleetConfig {
            max_concurrent,
            stagger_secs: 0,
            slot_poll_secs: 1,
            ..FleetConfig::default()
        }
    }

    fn fixture(
        dir: &std::path::Path,
        max_concurrent: usize,
        backend: MockBackend,
    ) -> (Arc<RunContext>, ConcurrentScheduler) {
        let ctx = Arc::new(RunContext::init(test_config(max_concurrent), dir).unwrap());
        let resolver = Arc::new(ProxyResolver::direct_only(&ctx.extensions_dir));
        let launcher = Arc::new(SessionLauncher::new(Arc::new(backend), resolver));
        let scheduler = ConcurrentScheduler::new(launcher, CancelToken::new());
        (ctx, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn pool_is_bounded_and_queue_drains() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::default();
        let peak = Arc::clone(&backend.peak);
        let launches = Arc::clone(&backend.launches);
        let (ctx, scheduler) = fixture(dir.path(), 2, backend);

        let report = scheduler
            .run(ctx, Profile::numbered(6), Arc::new(DwellHandler(Duration::from_millis(200))))
            .await;

        assert!(report.is_clean(), "skipped: {:?}", report.skipped);
        assert_eq!(report.completed.len(), 6);
        assert_eq!(launches.load(Ordering::SeqCst), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {} > 2", peak.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn same_profile_never_runs_twice_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::default();
        let duplicate = Arc::clone(&backend.duplicate_seen);
        let (ctx, scheduler) = fixture(dir.path(), 4, backend);

        let profiles = vec![Profile::new("dup"), Profile::new("dup")];
        let report = scheduler
            .run(ctx, profiles, Arc::new(DwellHandler(Duration::from_millis(100))))
            .await;

        assert!(!duplicate.load(Ordering::SeqCst));
        assert_eq!(report.completed, vec!["dup", "dup"]);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_runs_exactly_once_even_when_handler_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::default();
        let launches = Arc::clone(&backend.launches);
        let teardowns = Arc::clone(&backend.teardowns);
        let (ctx, scheduler) = fixture(dir.path(), 2, backend);

        let report = scheduler
            .run(ctx, Profile::numbered(3), Arc::new(FailingHandler { fail_for: "2" }))
            .await;

        assert_eq!(teardowns.load(Ordering::SeqCst), launches.load(Ordering::SeqCst));
        assert_eq!(report.completed.len(), 2);
        assert!(matches!(
            report.skipped.as_slice(),
            [(name, SkipReason::HandlerFailed(_))] if name == "2"
        ));
    }

    struct HaltingHandler;

    #[async_trait]
    impl SessionHandler for HaltingHandler {
        async fn invoke(&self, _: &mut Session, _: &Profile) -> Result<Flow, FleetError> {
            Ok(Flow::Halt("saw enough".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn halting_handler_still_completes_and_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::default();
        let teardowns = Arc::clone(&backend.teardowns);
        let (ctx, scheduler) = fixture(dir.path(), 2, backend);

        let report = scheduler.run(ctx, Profile::numbered(2), Arc::new(HaltingHandler)).await;

        assert!(report.is_clean());
        assert_eq!(report.completed.len(), 2);
        assert_eq!(teardowns.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_skips_only_that_profile() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend {
            fail_for: HashSet::from(["2".to_string()]),
            ..MockBackend::default()
        };
        let (ctx, scheduler) = fixture(dir.path(), 2, backend);

        let report = scheduler
            .run(ctx, Profile::numbered(3), Arc::new(DwellHandler(Duration::ZERO)))
            .await;

        assert_eq!(report.completed.len(), 2);
        assert!(matches!(
            report.skipped.as_slice(),
            [(name, SkipReason::LaunchFailed(_))] if name == "2"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_launch_times_out_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend {
            stall_for: HashSet::from(["1".to_string()]),
            ..MockBackend::default()
        };
        let teardowns = Arc::clone(&backend.teardowns);

        let mut config = test_config(2);
        config.startup_timeout_secs = 3;
        let ctx = Arc::new(RunContext::init(config, dir.path()).unwrap());
        let resolver = Arc::new(ProxyResolver::direct_only(&ctx.extensions_dir));
        let launcher = Arc::new(SessionLauncher::new(Arc::new(backend), resolver));
        let scheduler = ConcurrentScheduler::new(launcher, CancelToken::new());

        let report = scheduler
            .run(ctx, Profile::numbered(2), Arc::new(DwellHandler(Duration::ZERO)))
            .await;

        assert_eq!(report.completed, vec!["2"]);
        assert!(matches!(
            report.skipped.as_slice(),
            [(name, SkipReason::LaunchFailed(msg))]
                if name == "1" && msg.contains("timed out after 3s")
        ));
        // The stalled profile never produced a session to tear down.
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_locked_profile_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::default();
        let (ctx, scheduler) = fixture(dir.path(), 2, backend);

        std::fs::write(
            ctx.locks.profile_lock_path("1"),
            format!("TOOL=some-other-tool\nPYTHONPID={}\n", std::process::id()),
        )
        .unwrap();

        let report = scheduler
            .run(Arc::clone(&ctx), Profile::numbered(2), Arc::new(DwellHandler(Duration::ZERO)))
            .await;

        assert_eq!(report.completed, vec!["2"]);
        assert!(matches!(
            report.skipped.as_slice(),
            [(name, SkipReason::ForeignLock { tool })] if name == "1" && tool == "some-other-tool"
        ));
        // The refused lock stays in place for its owner.
        assert!(ctx.locks.profile_lock_path("1").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_skips_remaining_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::default();
        let (ctx, _) = fixture(dir.path(), 2, MockBackend::default());
        let resolver = Arc::new(ProxyResolver::direct_only(&ctx.extensions_dir));
        let launcher = Arc::new(SessionLauncher::new(Arc::new(backend), resolver));
        let cancel = CancelToken::new();
        cancel.cancel();
        let scheduler = ConcurrentScheduler::new(launcher, cancel);

        let report = scheduler
            .run(ctx, Profile::numbered(3), Arc::new(DwellHandler(Duration::ZERO)))
            .await;

        assert!(report.completed.is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert!(report
            .skipped
            .iter()
            .all(|(_, reason)| *reason == SkipReason::Cancelled));
    }
}
