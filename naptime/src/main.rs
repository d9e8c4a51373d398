//! naptime — continuously send SIGSTOP and SIGCONT to throttle process activity
//!
//! Actions:
//! - `wake`: unconditionally resume a process and its children
//! - `nap`: throttle a process's children for a number of minutes
//! - `self-test`: throttle a throwaway busy loop and compare its progress

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use naptime::config::{self, NaptimeConfig};
use naptime::{logging, Controller, LsofLookup, RootOutcome, ThrottleSession};

mod selftest;

#[derive(Parser, Debug)]
#[command(name = "naptime")]
#[command(version, about = "Throttle a process tree by cycling SIGSTOP and SIGCONT over its children")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "NAPTIME_CONFIG")]
    config: Option<PathBuf>,

    /// Emit structured JSON log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Unconditionally resume a process and all of its children
    Wake {
        #[command(flatten)]
        target: Target,
    },

    /// Repeatedly suspend a process's children for a number of minutes
    Nap {
        #[command(flatten)]
        target: Target,

        /// Number of minutes to incur naps for
        minutes: u64,

        /// Seconds to keep the children suspended per cycle (fractions allowed)
        #[arg(long)]
        nap_quantum: Option<f64>,

        /// Seconds to let the children run between cycles (fractions allowed)
        #[arg(long)]
        wake_quantum: Option<f64>,
    },

    /// Throttle a throwaway busy loop and check that it slows down
    SelfTest,

    /// Busy loop used by self-test
    #[command(hide = true)]
    Burn {
        #[arg(long, default_value_t = 5.0)]
        seconds: f64,

        /// Run the loop in a child process and wait for it
        #[arg(long)]
        spawn_child: bool,
    },
}

/// The parent process to act on
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct Target {
    /// Parent process id
    #[arg(long, short, value_parser = clap::value_parser!(u32).range(1..))]
    pid: Option<u32>,

    /// Target whichever process is listening on this TCP port
    #[arg(long)]
    port: Option<u16>,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("naptime: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = config::config_path(cli.config.as_deref());
    let loaded = config::load_config(&config_path)?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();

    // The burner's stdout is parsed by self-test; keep it free of log lines
    if !matches!(cli.action, Action::Burn { .. }) {
        logging::init_logging(&config.logging.level, cli.log_json || config.logging.json)?;
        if !found {
            warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
        }
    }

    match cli.action {
        Action::Wake { target } => {
            let root = resolve_target(&target, &config)?;
            let report = Controller::system(&config.commands.ps).wake(root);
            if report.root == RootOutcome::Gone {
                info!("Process {root} does not exist; nothing to wake");
            }
            Ok(())
        }
        Action::Nap {
            target,
            minutes,
            nap_quantum,
            wake_quantum,
        } => {
            let root = resolve_target(&target, &config)?;
            let session = ThrottleSession::for_minutes(
                root,
                minutes,
                nap_quantum.unwrap_or(config.throttle.nap_quantum_secs),
                wake_quantum.unwrap_or(config.throttle.wake_quantum_secs),
            )?;

            install_shutdown_handlers();
            let summary = Controller::system(&config.commands.ps)
                .run_bounded(&session, &SHUTDOWN)
                .with_context(|| format!("Throttling of {root} aborted after resuming its tree"))?;

            if summary.interrupted {
                warn!("Interrupted after {} cycles; tree resumed", summary.cycles);
            }
            Ok(())
        }
        Action::SelfTest => {
            install_shutdown_handlers();
            selftest::run(&config, &SHUTDOWN)
        }
        Action::Burn {
            seconds,
            spawn_child,
        } => selftest::burn(seconds, spawn_child),
    }
}

fn resolve_target(target: &Target, config: &NaptimeConfig) -> Result<u32> {
    match (target.pid, target.port) {
        (Some(pid), _) => Ok(pid),
        (None, Some(port)) => {
            let pid = LsofLookup::new(&config.commands.lsof)
                .resolve_port(port)?
                .ok_or_else(|| anyhow!("No process is listening on TCP port {port}"))?;
            info!("Port {port} is owned by pid {pid}");
            Ok(pid)
        }
        (None, None) => Err(anyhow!("Either --pid or --port is required")),
    }
}

/// SIGINT/SIGTERM/SIGHUP end the throttle loop after the current cycle's
/// resume instead of killing naptime with children still stopped.
fn install_shutdown_handlers() {
    use nix::sys::signal::{signal, SigHandler, Signal};

    for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
        // SAFETY: the handler only stores to an atomic
        if let Err(e) = unsafe { signal(sig, SigHandler::Handler(handle_shutdown)) } {
            warn!("Failed to install {sig} handler: {e}");
        }
    }
}

extern "C" fn handle_shutdown(_sig: nix::libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_nap_with_overrides() {
        let cli = Cli::try_parse_from([
            "naptime",
            "nap",
            "--pid",
            "100",
            "15",
            "--nap-quantum",
            "0.5",
        ])
        .unwrap();
        match cli.action {
            Action::Nap {
                target,
                minutes,
                nap_quantum,
                wake_quantum,
            } => {
                assert_eq!(target.pid, Some(100));
                assert_eq!(minutes, 15);
                assert_eq!(nap_quantum, Some(0.5));
                assert_eq!(wake_quantum, None);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_target_requires_exactly_one_of_pid_and_port() {
        assert!(Cli::try_parse_from(["naptime", "wake"]).is_err());
        assert!(Cli::try_parse_from(["naptime", "wake", "--pid", "1", "--port", "5432"]).is_err());
        assert!(Cli::try_parse_from(["naptime", "wake", "--pid", "0"]).is_err());

        let cli = Cli::try_parse_from(["naptime", "wake", "--port", "5432"]).unwrap();
        match cli.action {
            Action::Wake { target } => assert_eq!(target.port, Some(5432)),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_explicit_pid_skips_lookup() {
        let target = Target {
            pid: Some(4711),
            port: None,
        };
        let mut config = NaptimeConfig::default();
        config.commands.lsof = "/nonexistent/naptime-lsof".into();
        assert_eq!(resolve_target(&target, &config).unwrap(), 4711);
    }
}
