//! Error types for the throttling core

use crate::actuator::SignalAction;

/// The process-table query itself failed.
///
/// "No children" is never an error; see [`crate::inspector::Inspector::discover_children`].
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Failed to run process listing: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Process listing for children of {root} did not complete successfully: {stderr}")]
    QueryFailed { root: u32, stderr: String },

    #[error("Unexpected process listing line: {line:?}")]
    Malformed { line: String },
}

/// Delivery of a single stop/continue signal failed.
///
/// Always swallowed by the actuator; a vanished pid needs no resume.
#[derive(Debug, thiserror::Error)]
#[error("Failed to send {action} to pid {pid}: {errno}")]
pub struct SignalDeliveryError {
    pub pid: u32,
    pub action: SignalAction,
    pub errno: nix::errno::Errno,
}

impl SignalDeliveryError {
    /// The process no longer exists.
    pub fn is_vanished(&self) -> bool {
        self.errno == nix::errno::Errno::ESRCH
    }
}

/// Port-to-pid resolution failed before any throttling started.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Failed to run port lookup: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Port lookup for {port} failed: {stderr}")]
    QueryFailed { port: u16, stderr: String },

    #[error("Port {port} does not resolve to exactly one listening pid: {output:?}")]
    Ambiguous { port: u16, output: String },
}

/// A throttle session was requested with unusable timing parameters.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{name} must be {requirement}, got {value}")]
    InvalidQuantum {
        name: &'static str,
        requirement: &'static str,
        value: f64,
    },

    #[error("Session length {length:?} is too long to schedule")]
    DeadlineOverflow { length: std::time::Duration },
}
