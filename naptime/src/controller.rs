//! Throttle controller
//!
//! Drives repeated discover → suspend → nap → resume cycles against a root
//! process until a fixed deadline, and guarantees every cycle's suspends
//! are paired with a resume whichever way the cycle exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::actuator::{Actuator, NixSignaller, Signaller, WakeReport};
use crate::error::{DiscoveryError, SessionError};
use crate::inspector::{Inspector, ProcessTable, PsTable};

/// Parameters of one bounded throttle request
#[derive(Debug, Clone)]
pub struct ThrottleSession {
    pub root: u32,
    pub nap_quantum: Duration,
    pub wake_quantum: Duration,
    pub deadline: Instant,
    pub ends_at: DateTime<Local>,
}

impl ThrottleSession {
    /// Throttle `root` for `minutes` from now.
    ///
    /// The deadline is fixed here and never recomputed, so slow cycles
    /// cannot stretch the session.
    pub fn for_minutes(
        root: u32,
        minutes: u64,
        nap_secs: f64,
        wake_secs: f64,
    ) -> Result<Self, SessionError> {
        let length = Duration::from_secs(minutes.saturating_mul(60));
        Self::for_duration(root, length, nap_secs, wake_secs)
    }

    pub fn for_duration(
        root: u32,
        length: Duration,
        nap_secs: f64,
        wake_secs: f64,
    ) -> Result<Self, SessionError> {
        let nap_quantum = Duration::try_from_secs_f64(nap_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or(SessionError::InvalidQuantum {
                name: "nap quantum",
                requirement: "a positive number of seconds",
                value: nap_secs,
            })?;
        let wake_quantum =
            Duration::try_from_secs_f64(wake_secs).map_err(|_| SessionError::InvalidQuantum {
                name: "wake quantum",
                requirement: "zero or more seconds",
                value: wake_secs,
            })?;

        let now = Instant::now();
        let deadline = now
            .checked_add(length)
            .ok_or(SessionError::DeadlineOverflow { length })?;
        let ends_at = chrono::Duration::from_std(length)
            .ok()
            .and_then(|d| Local::now().checked_add_signed(d))
            .unwrap_or_else(Local::now);

        Ok(Self {
            root,
            nap_quantum,
            wake_quantum,
            deadline,
            ends_at,
        })
    }
}

/// Outcome of a single throttle cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub discovered: usize,
    pub suspended: Vec<u32>,
    pub wake: WakeReport,
}

/// Outcome of a bounded throttle
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub cycles: u64,
    /// Total suspend attempts across all cycles
    pub suspensions: u64,
    pub final_wake: WakeReport,
    /// Stopped early by the shutdown flag rather than the deadline
    pub interrupted: bool,
}

/// Resumes the tree when dropped unless already released.
///
/// Covers `?` returns and panics between the first SIGSTOP and the
/// explicit resume at the end of a cycle.
struct ResumeGuard<'a, T: ProcessTable, S: Signaller> {
    actuator: &'a Actuator<T, S>,
    root: u32,
    suspended: Vec<u32>,
    armed: bool,
}

impl<'a, T: ProcessTable, S: Signaller> ResumeGuard<'a, T, S> {
    fn new(actuator: &'a Actuator<T, S>, root: u32) -> Self {
        Self {
            actuator,
            root,
            suspended: Vec::new(),
            armed: true,
        }
    }

    fn record(&mut self, pids: Vec<u32>) {
        self.suspended.extend(pids);
    }

    fn release(mut self) -> WakeReport {
        self.armed = false;
        self.actuator.resume_tree(self.root, &self.suspended)
    }
}

impl<T: ProcessTable, S: Signaller> Drop for ResumeGuard<'_, T, S> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                root = self.root,
                "Cycle aborted, resuming {} suspended pid(s) and the root",
                self.suspended.len()
            );
            self.actuator.resume_tree(self.root, &self.suspended);
        }
    }
}

pub struct Controller<T, S> {
    actuator: Actuator<T, S>,
}

impl Controller<PsTable, NixSignaller> {
    /// Controller over the live process table and real signals
    pub fn system(ps_binary: &str) -> Self {
        Self::new(PsTable::new(ps_binary), NixSignaller)
    }
}

impl<T: ProcessTable, S: Signaller> Controller<T, S> {
    pub fn new(table: T, signaller: S) -> Self {
        Self {
            actuator: Actuator::new(Inspector::new(table), signaller),
        }
    }

    pub fn actuator(&self) -> &Actuator<T, S> {
        &self.actuator
    }

    /// Unconditional, idempotent wake of `root` and its current children.
    ///
    /// The recovery lever after a controller died without resuming.
    pub fn wake(&self, root: u32) -> WakeReport {
        let report = self.actuator.resume_all(root);
        info!(
            root,
            root_outcome = ?report.root,
            children = report.children_attempted(),
            resumed = report.resumed.len(),
            vanished = report.vanished.len(),
            refused = report.refused.len(),
            "Wake complete"
        );
        report
    }

    /// One discover → suspend → nap → resume cycle.
    ///
    /// The resume runs even if discovery fails or the nap panics.
    pub fn run_cycle(&self, session: &ThrottleSession) -> Result<CycleReport, DiscoveryError> {
        let mut guard = ResumeGuard::new(&self.actuator, session.root);

        let children = self.actuator.inspector().discover_children(session.root)?;
        let suspended = self.actuator.suspend_non_immune(&children);
        let suspended_count = suspended.len();
        guard.record(suspended.clone());

        thread::sleep(session.nap_quantum);

        let wake = guard.release();
        debug!(
            root = session.root,
            discovered = children.len(),
            suspended = suspended_count,
            "Cycle complete"
        );

        Ok(CycleReport {
            discovered: children.len(),
            suspended,
            wake,
        })
    }

    /// Cycle until the session deadline or until `shutdown` is set.
    ///
    /// A final unconditional resume always runs before this returns, on
    /// success and on error alike.
    pub fn run_bounded(
        &self,
        session: &ThrottleSession,
        shutdown: &AtomicBool,
    ) -> Result<SessionSummary, DiscoveryError> {
        info!(
            root = session.root,
            nap_quantum = ?session.nap_quantum,
            wake_quantum = ?session.wake_quantum,
            "Throttling until {}",
            session.ends_at.format("%Y-%m-%d %H:%M:%S")
        );

        let mut cycles = 0u64;
        let mut suspensions = 0u64;
        let outcome = self.cycle_until_deadline(session, shutdown, &mut cycles, &mut suspensions);

        let final_wake = self.actuator.resume_all(session.root);
        info!(
            root = session.root,
            cycles,
            suspensions,
            root_outcome = ?final_wake.root,
            "Throttle session ended"
        );

        let interrupted = outcome?;
        Ok(SessionSummary {
            cycles,
            suspensions,
            final_wake,
            interrupted,
        })
    }

    fn cycle_until_deadline(
        &self,
        session: &ThrottleSession,
        shutdown: &AtomicBool,
        cycles: &mut u64,
        suspensions: &mut u64,
    ) -> Result<bool, DiscoveryError> {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, leaving throttle loop");
                return Ok(true);
            }
            if Instant::now() >= session.deadline {
                return Ok(false);
            }

            let report = self.run_cycle(session)?;
            *cycles += 1;
            *suspensions += report.suspended.len() as u64;

            let remaining = session.deadline.saturating_duration_since(Instant::now());
            let hold = session.wake_quantum.min(remaining);
            if !hold.is_zero() {
                thread::sleep(hold);
            }
        }
    }
}
