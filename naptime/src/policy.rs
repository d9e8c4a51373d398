//! Immunity policy
//!
//! Some children must keep running or the throttled system can never make
//! forward progress: the backlog drainer, the diagnostic logger, the
//! checkpointer and the write-path flushers checkpoints wait on. They are
//! recognised by a marker substring in their command line.

use std::fmt;

use crate::inspector::ProcessRecord;

/// A role exempt from suspension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImmuneRole {
    Archiver,
    Logger,
    Checkpointer,
    Writer,
}

impl ImmuneRole {
    pub const ALL: [ImmuneRole; 4] = [
        ImmuneRole::Archiver,
        ImmuneRole::Logger,
        ImmuneRole::Checkpointer,
        ImmuneRole::Writer,
    ];

    /// Case-sensitive substring matched against the command line
    pub fn marker(self) -> &'static str {
        match self {
            ImmuneRole::Archiver => "archiver",
            ImmuneRole::Logger => "logger",
            ImmuneRole::Checkpointer => "checkpoint",
            ImmuneRole::Writer => "writer",
        }
    }
}

impl fmt::Display for ImmuneRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// First immune role whose marker appears in `command_line`
pub fn immune_role(command_line: &str) -> Option<ImmuneRole> {
    ImmuneRole::ALL
        .into_iter()
        .find(|role| command_line.contains(role.marker()))
}

pub fn is_immune(record: &ProcessRecord) -> bool {
    immune_role(&record.command_line).is_some()
}
