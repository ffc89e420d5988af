//! Process inspection helpers
//!
//! Liveness checks and process-tree kills backed by `sysinfo`, so lock
//! reclamation works the same on Linux, macOS and Windows.

use std::collections::VecDeque;

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// True if the OS reports the process running and not terminated/zombie.
pub fn is_alive(pid: u32) -> bool {
    let target = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    match sys.process(target) {
        Some(proc) => !matches!(proc.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
        None => false,
    }
}

/// Kill a process and all of its descendants, children first to avoid
/// orphans. Returns true when the root is gone afterwards (a missing PID
/// counts as success).
pub fn kill_tree(pid: u32) -> bool {
    let root = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    if sys.process(root).is_none() {
        return true;
    }

    let mut order = descendants_of(&sys, root);
    order.reverse();
    for child in order {
        if let Some(proc) = sys.process(child) {
            if !proc.kill() {
                warn!("could not kill child process {}", child.as_u32());
            }
        }
    }

    match sys.process(root) {
        Some(proc) => {
            let ok = proc.kill();
            if !ok {
                warn!("could not kill process {}", pid);
            }
            ok
        }
        None => true,
    }
}

/// Walk the descendant tree of `root` and return the PID of the first
/// process whose image name looks like a Chrome/Chromium browser.
///
/// The launched controller process (a driver shim) usually spawns the real
/// browser as a child; the lock must record the browser itself.
pub fn find_browser_child(root: u32) -> Option<u32> {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    for pid in descendants_of(&sys, Pid::from_u32(root)) {
        if let Some(proc) = sys.process(pid) {
            let name = proc.name().to_string_lossy().to_lowercase();
            if name.contains("chrome") || name.contains("chromium") {
                debug!("browser child of {} is {} ({})", root, pid.as_u32(), name);
                return Some(pid.as_u32());
            }
        }
    }
    None
}

/// Breadth-first list of all descendants of `root`, parents before children.
fn descendants_of(sys: &System, root: Pid) -> Vec<Pid> {
    let mut result = Vec::new();
    let mut frontier = VecDeque::from([root]);

    while let Some(current) = frontier.pop_front() {
        for (pid, proc) in sys.processes() {
            if proc.parent() == Some(current) {
                result.push(*pid);
                frontier.push_back(*pid);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn absurd_pid_is_dead() {
        // Default pid_max on Linux is 4194304; well past any real PID.
        assert!(!is_alive(999_999_999));
    }

    #[test]
    fn kill_tree_of_missing_pid_succeeds() {
        assert!(kill_tree(999_999_999));
    }

    #[test]
    fn no_browser_child_for_leaf_process() {
        // The test process spawns no chrome children.
        assert_eq!(find_browser_child(std::process::id()), None);
    }
}
