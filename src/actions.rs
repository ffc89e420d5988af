//! Action-chain executor
//!
//! Caller automation logic is expressed as an ordered chain of labeled
//! steps, each reporting success or failure. Critical steps abort the
//! chain on failure; best-effort steps let it continue, but any failure
//! anywhere makes the whole chain report failure.

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

/// Control-flow signal returned by session handlers.
///
/// `Halt` is the intentional early-exit path (snapshot taken, run
/// abandoned on purpose). It is distinct from an error: the session is
/// still torn down normally and the run counts as handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt(String),
}

/// One labeled step in an action chain.
pub struct ActionStep<'a> {
    label: String,
    stop_on_failure: bool,
    op: BoxFuture<'a, bool>,
}

impl<'a> ActionStep<'a> {
    /// A critical step: failure aborts the rest of the chain.
    pub fn new<F>(label: impl Into<String>, op: F) -> Self
    where
        F: std::future::Future<Output = bool> + Send + 'a,
    {
        Self { label: label.into(), stop_on_failure: true, op: op.boxed() }
    }

    /// A best-effort step: failure is recorded but the chain continues.
    pub fn best_effort<F>(label: impl Into<String>, op: F) -> Self
    where
        F: std::future::Future<Output = bool> + Send + 'a,
    {
        Self { label: label.into(), stop_on_failure: false, op: op.boxed() }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Run steps in order. Returns true only if every step succeeded.
///
/// A failed critical step stops the chain immediately; a failed
/// best-effort step lets later steps run but the final result is still
/// false. `on_error` is invoked with the label of every failed step.
pub async fn run_chain<'a>(
    steps: Vec<ActionStep<'a>>,
    mut on_error: impl FnMut(&str),
) -> bool {
    let mut ok = true;
    for step in steps {
        debug!("action step: {}", step.label);
        if step.op.await {
            continue;
        }
        on_error(&step.label);
        if step.stop_on_failure {
            warn!("action step {:?} failed, aborting chain", step.label);
            return false;
        }
        warn!("action step {:?} failed, continuing", step.label);
        ok = false;
    }
    ok
}
