//! Resolve a listening TCP port to the pid that owns it

use std::process::Command;

use tracing::debug;

use crate::error::ResolveError;

/// `lsof -nP -t -iTCP:<port> -sTCP:LISTEN`
#[derive(Debug, Clone)]
pub struct LsofLookup {
    binary: String,
}

impl LsofLookup {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// The single pid listening on `port`, or `None` if nothing is.
    ///
    /// Several listeners on one port are reported as ambiguous rather than
    /// picking one.
    pub fn resolve_port(&self, port: u16) -> Result<Option<u32>, ResolveError> {
        let output = Command::new(&self.binary)
            .args(["-nP", "-t"])
            .arg(format!("-iTCP:{port}"))
            .arg("-sTCP:LISTEN")
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(port, status = %output.status, "Port lookup finished");

        // lsof exits 1 when nothing matches, often with warnings about
        // file systems it could not stat
        if !output.status.success() && stdout.trim().is_empty() {
            let errors = significant_stderr(&stderr);
            if !errors.is_empty() {
                return Err(ResolveError::QueryFailed {
                    port,
                    stderr: errors,
                });
            }
            return Ok(None);
        }

        parse_listener_pid(port, &stdout)
    }
}

/// Drop lsof's advisory warnings and their continuation lines.
fn significant_stderr(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && !line.starts_with("lsof: WARNING")
                && *line != "Output information may be incomplete."
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Expect nothing, or exactly one positive pid.
pub fn parse_listener_pid(port: u16, stdout: &str) -> Result<Option<u32>, ResolveError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    match trimmed.parse::<u32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        _ => Err(ResolveError::Ambiguous {
            port,
            output: trimmed.to_string(),
        }),
    }
}
