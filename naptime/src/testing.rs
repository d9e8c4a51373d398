//! In-memory process table and signal recorder for unit tests

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use nix::errno::Errno;

use crate::actuator::{SignalAction, Signaller};
use crate::error::SignalDeliveryError;
use crate::inspector::{ProcessTable, QueryOutput};

#[derive(Default)]
pub struct FakeTable {
    children: RefCell<HashMap<u32, Vec<(u32, String)>>>,
    failure: RefCell<Option<String>>,
    queries: RefCell<usize>,
}

impl FakeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_children(&self, root: u32, children: &[(u32, &str)]) {
        self.children.borrow_mut().insert(
            root,
            children
                .iter()
                .map(|(pid, args)| (*pid, args.to_string()))
                .collect(),
        );
    }

    /// Make every later query exit non-zero with this diagnostic.
    pub fn fail_with(&self, stderr: &str) {
        *self.failure.borrow_mut() = Some(stderr.to_string());
    }

    pub fn queries(&self) -> usize {
        *self.queries.borrow()
    }
}

impl ProcessTable for FakeTable {
    fn query_children(&self, root: u32) -> std::io::Result<QueryOutput> {
        *self.queries.borrow_mut() += 1;

        if let Some(stderr) = self.failure.borrow().as_ref() {
            return Ok(QueryOutput {
                success: false,
                stdout: String::new(),
                stderr: stderr.clone(),
            });
        }

        match self.children.borrow().get(&root) {
            Some(children) if !children.is_empty() => Ok(QueryOutput {
                success: true,
                stdout: children
                    .iter()
                    .map(|(pid, args)| format!("{pid:>5} {args}\n"))
                    .collect(),
                stderr: String::new(),
            }),
            // ps exits 1 with nothing on either channel when no rows match
            _ => Ok(QueryOutput::default()),
        }
    }
}

/// Records every delivery and tracks which pids it left stopped.
#[derive(Default)]
pub struct RecordingSignaller {
    sent: RefCell<Vec<(u32, SignalAction, Instant)>>,
    stopped: RefCell<BTreeSet<u32>>,
    vanished: RefCell<BTreeSet<u32>>,
    refused: RefCell<BTreeSet<u32>>,
}

impl RecordingSignaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries to `pid` fail with ESRCH from now on.
    pub fn vanish(&self, pid: u32) {
        self.vanished.borrow_mut().insert(pid);
    }

    /// Deliveries to `pid` fail with EPERM from now on.
    pub fn refuse(&self, pid: u32) {
        self.refused.borrow_mut().insert(pid);
    }

    pub fn sent(&self) -> Vec<(u32, SignalAction)> {
        self.sent
            .borrow()
            .iter()
            .map(|(pid, action, _)| (*pid, *action))
            .collect()
    }

    pub fn sent_at(&self) -> Vec<(u32, SignalAction, Instant)> {
        self.sent.borrow().clone()
    }

    pub fn count(&self, pid: u32, action: SignalAction) -> usize {
        self.sent
            .borrow()
            .iter()
            .filter(|(p, a, _)| *p == pid && *a == action)
            .count()
    }

    pub fn is_stopped(&self, pid: u32) -> bool {
        self.stopped.borrow().contains(&pid)
    }

    pub fn stopped(&self) -> BTreeSet<u32> {
        self.stopped.borrow().clone()
    }
}

impl Signaller for RecordingSignaller {
    fn send(&self, pid: u32, action: SignalAction) -> Result<(), SignalDeliveryError> {
        self.sent.borrow_mut().push((pid, action, Instant::now()));

        let errno = if self.vanished.borrow().contains(&pid) {
            Some(Errno::ESRCH)
        } else if self.refused.borrow().contains(&pid) {
            Some(Errno::EPERM)
        } else {
            None
        };
        if let Some(errno) = errno {
            return Err(SignalDeliveryError { pid, action, errno });
        }

        match action {
            SignalAction::Suspend => self.stopped.borrow_mut().insert(pid),
            SignalAction::Resume => self.stopped.borrow_mut().remove(&pid),
        };
        Ok(())
    }
}
