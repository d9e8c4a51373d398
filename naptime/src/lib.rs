//! naptime — throttle a process tree with SIGSTOP/SIGCONT
//!
//! Each cycle lists the root's direct children, stops the ones that are not
//! immune, naps, then continues the root and every child. A resume always
//! follows a suspend, whichever way the cycle ends.

pub mod actuator;
pub mod config;
pub mod controller;
pub mod error;
pub mod inspector;
pub mod logging;
pub mod policy;
pub mod resolve;

#[cfg(test)]
mod testing;

pub use actuator::{Actuator, NixSignaller, RootOutcome, SignalAction, Signaller, WakeReport};
pub use controller::{Controller, CycleReport, SessionSummary, ThrottleSession};
pub use error::{DiscoveryError, ResolveError, SessionError, SignalDeliveryError};
pub use inspector::{process_state, Inspector, ProcessRecord, ProcessState, ProcessTable, PsTable};
pub use policy::{immune_role, is_immune, ImmuneRole};
pub use resolve::LsofLookup;
