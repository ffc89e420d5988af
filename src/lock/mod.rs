//! Filesystem locks and process liveness
//!
//! Cross-process mutual exclusion for browser profiles. The model is a
//! single-host, self-healing reconciliation pass over small `KEY=VALUE`
//! lock files, trusting OS process liveness over explicit unlocks.

mod process;
mod store;

pub use process::{find_browser_child, is_alive, kill_tree};
pub use store::{sanitize, LockDecision, LockRecord, LockStore, ReclaimReason};
