//! Minimal end-to-end run against a locally installed Chromium.
//!
//! Spawns a handful of numbered profiles through the concurrent scheduler,
//! each holding its window open briefly before moving on. Point `CHROME`
//! at a Chromium binary if it is not on PATH as `chromium`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use browserfleet::{
    run_chain, ActionStep, BrowserBackend, BrowserHandle, CancelToken, ConcurrentScheduler,
    FleetConfig, FleetError, Flow, LaunchSpec, Profile, ProxyResolver, RunContext, Session,
    SessionHandler, SessionLauncher,
};

struct ProcessBackend {
    binary: String,
}

struct ProcessHandle {
    child: tokio::process::Child,
    pid: Option<u32>,
}

#[async_trait]
impl BrowserHandle for ProcessHandle {
    fn driver_pid(&self) -> Option<u32> {
        self.pid
    }

    async fn terminate(&mut self) -> Result<(), FleetError> {
        self.child
            .start_kill()
            .map_err(|e| FleetError::Teardown(e.to_string()))?;
        let _ = self.child.wait().await;
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, FleetError> {
        Err(FleetError::ScreenshotFailed(
            "plain process backend cannot capture".into(),
        ))
    }
}

#[async_trait]
impl BrowserBackend for ProcessBackend {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn BrowserHandle>, FleetError> {
        let child = tokio::process::Command::new(&self.binary)
            .args(spec.chrome_args())
            .arg("about:blank")
            .spawn()
            .map_err(|e| FleetError::LaunchFailure(e.to_string()))?;
        let pid = child.id();
        Ok(Box::new(ProcessHandle { child, pid }))
    }
}

struct DemoHandler;

#[async_trait]
impl SessionHandler for DemoHandler {
    async fn invoke(&self, session: &mut Session, profile: &Profile) -> Result<Flow, FleetError> {
        println!(
            "profile {} up at ({}, {}), browser pid {:?}",
            profile.name, session.window.x, session.window.y, session.browser_pid()
        );

        let steps = vec![
            ActionStep::new("settle", async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                true
            }),
            ActionStep::best_effort("dwell", async {
                tokio::time::sleep(Duration::from_secs(8)).await;
                true
            }),
        ];
        let ok = run_chain(steps, |label| {
            println!("profile {}: step {} failed", profile.name, label)
        })
        .await;

        if !ok {
            return Ok(session.snapshot("demo chain failed").await);
        }
        Ok(Flow::Continue)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = browserfleet::init_logging();

    let config = FleetConfig {
        max_concurrent: 2,
        stagger_secs: 2,
        slot_poll_secs: 2,
        ..FleetConfig::default()
    };

    let base = std::env::temp_dir().join("browserfleet-demo");
    let ctx = Arc::new(RunContext::init(config, base)?);

    let resolver = Arc::new(
        ProxyResolver::init(
            &ctx.config.shared_proxies,
            Duration::from_secs(ctx.config.proxy_timeout_secs),
            &ctx.extensions_dir,
        )
        .await,
    );

    let binary = std::env::var("CHROME").unwrap_or_else(|_| "chromium".to_string());
    let backend = Arc::new(ProcessBackend { binary });
    let launcher = Arc::new(
        SessionLauncher::new(backend, resolver).with_sink(Arc::new(browserfleet::notify::LogSink)),
    );

    let cancel = CancelToken::new();
    let scheduler = ConcurrentScheduler::new(launcher, cancel);

    let report = scheduler.run(Arc::clone(&ctx), Profile::numbered(4), Arc::new(DemoHandler)).await;

    println!("completed: {:?}", report.completed);
    for (name, reason) in &report.skipped {
        println!("skipped {name}: {reason}");
    }

    ctx.teardown();
    Ok(())
}
