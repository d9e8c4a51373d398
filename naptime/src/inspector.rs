//! Process tree inspection
//!
//! Lists the direct children of a root process through a line-oriented
//! process-table query, and probes individual processes via /proc.

use std::fs;
use std::process::Command;

use crate::error::DiscoveryError;

/// A direct child of the throttled root, as seen by one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub command_line: String,
}

/// Raw result of a process-table query
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Source of "children of pid" listings.
///
/// Output is one child per line: the pid, whitespace, then the full
/// command line.
pub trait ProcessTable {
    fn query_children(&self, root: u32) -> std::io::Result<QueryOutput>;
}

impl<T: ProcessTable + ?Sized> ProcessTable for &T {
    fn query_children(&self, root: u32) -> std::io::Result<QueryOutput> {
        (**self).query_children(root)
    }
}

/// `ps --ppid=<root> -o pid=,args=`
#[derive(Debug, Clone)]
pub struct PsTable {
    binary: String,
}

impl PsTable {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl ProcessTable for PsTable {
    fn query_children(&self, root: u32) -> std::io::Result<QueryOutput> {
        let output = Command::new(&self.binary)
            .arg(format!("--ppid={root}"))
            .args(["-o", "pid=,args="])
            .output()?;

        Ok(QueryOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Discovers the direct children of a process.
#[derive(Debug, Clone)]
pub struct Inspector<T> {
    table: T,
}

impl<T: ProcessTable> Inspector<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }

    /// Query the current direct children of `root`.
    ///
    /// A root with no children, or one that no longer exists, yields an
    /// empty list. `ps` exits non-zero in both of those cases as well as
    /// on real failures, so only a non-empty diagnostic channel is taken
    /// to mean the listing itself broke.
    pub fn discover_children(&self, root: u32) -> Result<Vec<ProcessRecord>, DiscoveryError> {
        let output = self.table.query_children(root)?;

        if !output.success {
            let stderr = output.stderr.trim();
            if stderr.is_empty() {
                return Ok(Vec::new());
            }
            return Err(DiscoveryError::QueryFailed {
                root,
                stderr: stderr.to_string(),
            });
        }

        parse_children(&output.stdout)
    }
}

/// Parse `pid args...` lines. The pid column may be right-aligned.
pub fn parse_children(stdout: &str) -> Result<Vec<ProcessRecord>, DiscoveryError> {
    let mut children = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (pid_str, rest) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));

        let pid = match pid_str.parse::<u32>() {
            Ok(pid) if pid > 0 => pid,
            _ => {
                return Err(DiscoveryError::Malformed {
                    line: line.to_string(),
                })
            }
        };

        children.push(ProcessRecord {
            pid,
            command_line: rest.trim().to_string(),
        });
    }

    Ok(children)
}

/// Scheduler state of a process, from the third field of /proc/<pid>/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessState(pub char);

impl ProcessState {
    /// Stopped by a signal (`T`) or under a tracer (`t`)
    pub fn is_stopped(self) -> bool {
        matches!(self.0, 'T' | 't')
    }
}

/// Probe a process. `None` when it does not exist (or /proc is unavailable).
pub fn process_state(pid: u32) -> Option<ProcessState> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_stat_state(&stat)
}

/// The comm field is parenthesised and may itself contain spaces or
/// parentheses, so the state is located after the last `)`.
fn parse_stat_state(stat: &str) -> Option<ProcessState> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    after_comm
        .split_whitespace()
        .next()
        .and_then(|field| field.chars().next())
        .map(ProcessState)
}
