//! Suspend/resume actuator
//!
//! Suspends are best-effort and never touch the root. Resumes are sent to
//! the root and every child, one pid at a time, and never fail as a whole.

use std::collections::BTreeSet;
use std::fmt;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::SignalDeliveryError;
use crate::inspector::{Inspector, ProcessRecord, ProcessTable};
use crate::policy::immune_role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalAction {
    Suspend,
    Resume,
}

impl SignalAction {
    pub fn signal(self) -> Signal {
        match self {
            SignalAction::Suspend => Signal::SIGSTOP,
            SignalAction::Resume => Signal::SIGCONT,
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signal().as_str())
    }
}

/// Delivers a stop or continue signal to one pid.
pub trait Signaller {
    fn send(&self, pid: u32, action: SignalAction) -> Result<(), SignalDeliveryError>;
}

impl<S: Signaller + ?Sized> Signaller for &S {
    fn send(&self, pid: u32, action: SignalAction) -> Result<(), SignalDeliveryError> {
        (**self).send(pid, action)
    }
}

/// `kill(2)` with SIGSTOP/SIGCONT
#[derive(Debug, Clone, Copy, Default)]
pub struct NixSignaller;

impl Signaller for NixSignaller {
    fn send(&self, pid: u32, action: SignalAction) -> Result<(), SignalDeliveryError> {
        // pid 0 and anything that wraps negative would address a process group
        let raw = match i32::try_from(pid) {
            Ok(raw) if raw > 0 => raw,
            _ => {
                return Err(SignalDeliveryError {
                    pid,
                    action,
                    errno: Errno::EINVAL,
                })
            }
        };

        kill(Pid::from_raw(raw), action.signal()).map_err(|errno| SignalDeliveryError {
            pid,
            action,
            errno,
        })
    }
}

/// What happened to the root during a resume pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootOutcome {
    Resumed,
    /// The root no longer exists; resuming it was a no-op.
    Gone,
    Refused,
}

/// Outcome of one resume pass. Informational only; a resume pass never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeReport {
    pub root: RootOutcome,
    /// Children that accepted SIGCONT
    pub resumed: Vec<u32>,
    /// Children that exited before they could be resumed
    pub vanished: Vec<u32>,
    /// Children the signal could not be delivered to for any other reason
    pub refused: Vec<u32>,
    /// Re-discovery failed; only the root and previously suspended pids were resumed.
    pub discovery_failed: bool,
}

impl WakeReport {
    /// Number of children a SIGCONT was attempted on
    pub fn children_attempted(&self) -> usize {
        self.resumed.len() + self.vanished.len() + self.refused.len()
    }
}

pub struct Actuator<T, S> {
    inspector: Inspector<T>,
    signaller: S,
}

impl<T: ProcessTable, S: Signaller> Actuator<T, S> {
    pub fn new(inspector: Inspector<T>, signaller: S) -> Self {
        Self {
            inspector,
            signaller,
        }
    }

    pub fn inspector(&self) -> &Inspector<T> {
        &self.inspector
    }

    /// SIGSTOP every child that is not immune.
    ///
    /// Returns every pid a suspend was attempted on. Each pid is recorded
    /// before its signal goes out: a spurious SIGCONT later is harmless, a
    /// SIGSTOP nobody remembers is not.
    pub fn suspend_non_immune(&self, children: &[ProcessRecord]) -> Vec<u32> {
        let mut attempted = Vec::with_capacity(children.len());

        for child in children {
            if let Some(role) = immune_role(&child.command_line) {
                debug!(pid = child.pid, %role, "Sparing immune child");
                continue;
            }

            attempted.push(child.pid);
            match self.signaller.send(child.pid, SignalAction::Suspend) {
                Ok(()) => debug!(pid = child.pid, "Suspended"),
                Err(e) => debug!("Ignoring suspend failure: {e}"),
            }
        }

        attempted
    }

    /// Unconditionally SIGCONT the root and its current children.
    ///
    /// Idempotent, and a no-op on a tree that is already running or gone.
    pub fn resume_all(&self, root: u32) -> WakeReport {
        self.resume_tree(root, &[])
    }

    /// Like [`Actuator::resume_all`], but also resumes `previously_suspended`
    /// even if those pids are no longer children of `root`.
    pub fn resume_tree(&self, root: u32, previously_suspended: &[u32]) -> WakeReport {
        let mut discovery_failed = false;
        let mut targets: BTreeSet<u32> = previously_suspended.iter().copied().collect();

        match self.inspector.discover_children(root) {
            Ok(children) => targets.extend(children.iter().map(|c| c.pid)),
            Err(e) => {
                warn!("Re-discovery of children of {root} failed, resuming known pids only: {e}");
                discovery_failed = true;
            }
        }
        targets.remove(&root);

        let mut report = WakeReport {
            root: RootOutcome::Resumed,
            resumed: Vec::new(),
            vanished: Vec::new(),
            refused: Vec::new(),
            discovery_failed,
        };

        // Children first, the root last: a running parent may fork new
        // children that would miss this pass.
        for pid in targets {
            match self.signaller.send(pid, SignalAction::Resume) {
                Ok(()) => report.resumed.push(pid),
                Err(e) if e.is_vanished() => {
                    debug!(pid, "Child vanished before resume");
                    report.vanished.push(pid);
                }
                Err(e) => {
                    warn!("{e}");
                    report.refused.push(pid);
                }
            }
        }

        report.root = match self.signaller.send(root, SignalAction::Resume) {
            Ok(()) => RootOutcome::Resumed,
            Err(e) if e.is_vanished() => {
                debug!(pid = root, "Root no longer exists");
                RootOutcome::Gone
            }
            Err(e) => {
                warn!("{e}");
                RootOutcome::Refused
            }
        };

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTable, RecordingSignaller};

    fn rec(pid: u32, command_line: &str) -> ProcessRecord {
        ProcessRecord {
            pid,
            command_line: command_line.to_string(),
        }
    }

    #[test]
    fn test_suspend_skips_immune_children() {
        let table = FakeTable::new();
        let sig = RecordingSignaller::new();
        let act = Actuator::new(Inspector::new(&table), &sig);

        let attempted = act.suspend_non_immune(&[
            rec(101, "postgres: checkpointer"),
            rec(102, "worker"),
            rec(103, "postgres: logger"),
        ]);

        assert_eq!(attempted, vec![102]);
        assert_eq!(sig.sent(), vec![(102, SignalAction::Suspend)]);
    }

    #[test]
    fn test_suspend_continues_past_vanished_pid() {
        let table = FakeTable::new();
        let sig = RecordingSignaller::new();
        sig.vanish(102);
        let act = Actuator::new(Inspector::new(&table), &sig);

        let attempted = act.suspend_non_immune(&[rec(102, "a"), rec(103, "b")]);

        assert_eq!(attempted, vec![102, 103]);
        assert!(sig.is_stopped(103));
    }

    #[test]
    fn test_resume_all_signals_children_then_root() {
        let table = FakeTable::new();
        table.set_children(100, &[(101, "x"), (102, "y")]);
        let sig = RecordingSignaller::new();
        let act = Actuator::new(Inspector::new(&table), &sig);

        let report = act.resume_all(100);

        assert_eq!(
            sig.sent(),
            vec![
                (101, SignalAction::Resume),
                (102, SignalAction::Resume),
                (100, SignalAction::Resume),
            ]
        );
        assert_eq!(report.root, RootOutcome::Resumed);
        assert_eq!(report.resumed, vec![101, 102]);
        assert!(!report.discovery_failed);
    }

    #[test]
    fn test_resume_swallows_every_delivery_failure() {
        let table = FakeTable::new();
        table.set_children(100, &[(101, "x"), (102, "y"), (103, "z")]);
        let sig = RecordingSignaller::new();
        sig.vanish(101);
        sig.refuse(102);
        let act = Actuator::new(Inspector::new(&table), &sig);

        let report = act.resume_all(100);

        assert_eq!(report.vanished, vec![101]);
        assert_eq!(report.refused, vec![102]);
        assert_eq!(report.resumed, vec![103]);
        assert_eq!(report.root, RootOutcome::Resumed);
        assert_eq!(sig.sent().len(), 4);
    }

    #[test]
    fn test_resume_of_dead_root_is_gone_not_error() {
        let table = FakeTable::new();
        let sig = RecordingSignaller::new();
        sig.vanish(100);
        let act = Actuator::new(Inspector::new(&table), &sig);

        let report = act.resume_all(100);

        assert_eq!(report.root, RootOutcome::Gone);
        assert_eq!(report.children_attempted(), 0);
    }

    #[test]
    fn test_resume_tree_includes_reparented_pids_once() {
        let table = FakeTable::new();
        table.set_children(100, &[(102, "worker")]);
        let sig = RecordingSignaller::new();
        let act = Actuator::new(Inspector::new(&table), &sig);

        // 105 was suspended but is no longer listed under 100
        let report = act.resume_tree(100, &[102, 105]);

        assert_eq!(report.resumed, vec![102, 105]);
        assert_eq!(sig.count(102, SignalAction::Resume), 1);
        assert_eq!(sig.count(105, SignalAction::Resume), 1);
        assert_eq!(sig.count(100, SignalAction::Resume), 1);
    }

    #[test]
    fn test_resume_survives_failed_rediscovery() {
        let table = FakeTable::new();
        table.fail_with("ps: permission denied");
        let sig = RecordingSignaller::new();
        let act = Actuator::new(Inspector::new(&table), &sig);

        let report = act.resume_tree(100, &[102]);

        assert!(report.discovery_failed);
        assert_eq!(
            sig.sent(),
            vec![(102, SignalAction::Resume), (100, SignalAction::Resume)]
        );
    }

    #[test]
    fn test_nix_signaller_rejects_group_pids() {
        let err = NixSignaller.send(0, SignalAction::Resume).unwrap_err();
        assert_eq!(err.errno, Errno::EINVAL);

        let err = NixSignaller.send(u32::MAX, SignalAction::Resume).unwrap_err();
        assert_eq!(err.errno, Errno::EINVAL);
    }

    #[test]
    fn test_signal_action_display() {
        assert_eq!(SignalAction::Suspend.to_string(), "SIGSTOP");
        assert_eq!(SignalAction::Resume.to_string(), "SIGCONT");
    }
}
