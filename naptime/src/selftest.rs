//! Quick and dirty self-test
//!
//! Spawns a busy loop, lets it count freely, then spawns another under a
//! throttled parent and checks it counted fewer times and was left running.

use std::process::{Command, Stdio};
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::info;

use naptime::config::NaptimeConfig;
use naptime::{process_state, Controller, ThrottleSession};

const BURN_SECS: f64 = 5.0;
/// Ends safely before the throttled burner finishes
const THROTTLE_FOR: Duration = Duration::from_secs(4);
const NAP_QUANTUM_SECS: f64 = 0.1;

/// Count loop iterations for `seconds` and print the total on stdout.
pub fn burn(seconds: f64, spawn_child: bool) -> Result<()> {
    if spawn_child {
        let exe = std::env::current_exe().context("Failed to locate naptime binary")?;
        let status = Command::new(exe)
            .args(["burn", "--seconds", &seconds.to_string()])
            .status()
            .context("Failed to spawn burner")?;
        if !status.success() {
            bail!("Burner exited with status: {status}");
        }
        return Ok(());
    }

    let length = Duration::try_from_secs_f64(seconds).context("Invalid burn length")?;
    let deadline = Instant::now() + length;
    let mut count: u64 = 0;
    while Instant::now() < deadline {
        count = std::hint::black_box(count.wrapping_add(1));
    }
    println!("{count}");
    Ok(())
}

fn burner_command(spawn_child: bool) -> Result<Command> {
    let exe = std::env::current_exe().context("Failed to locate naptime binary")?;
    let mut cmd = Command::new(exe);
    cmd.args(["burn", "--seconds", &BURN_SECS.to_string()]);
    if spawn_child {
        cmd.arg("--spawn-child");
    }
    cmd.stdout(Stdio::piped());
    Ok(cmd)
}

fn parse_count(stdout: &[u8]) -> Result<u64> {
    let text = String::from_utf8_lossy(stdout);
    text.trim()
        .parse::<u64>()
        .with_context(|| format!("Unexpected burner output: {text:?}"))
}

pub fn run(config: &NaptimeConfig, shutdown: &AtomicBool) -> Result<()> {
    info!("Beginning self test...");

    info!("Testing un-limited speed of a process");
    let output = burner_command(false)?
        .output()
        .context("Failed to run unthrottled burner")?;
    let unthrottled = parse_count(&output.stdout)?;
    info!("Unthrottled process: counted {unthrottled} times");

    info!("Testing throttled process, it should loop fewer times");
    let parent = burner_command(true)?
        .spawn()
        .context("Failed to spawn throttled burner")?;
    let root = parent.id();

    // Give the parent a moment to fork the burner it waits on
    thread::sleep(Duration::from_millis(100));

    let ctl = Controller::system(&config.commands.ps);
    let session =
        ThrottleSession::for_duration(root, THROTTLE_FOR, NAP_QUANTUM_SECS, 0.0)?;
    let summary = ctl.run_bounded(&session, shutdown)?;
    info!(
        "Throttle finished after {} cycles, {} suspensions",
        summary.cycles, summary.suspensions
    );

    let still_stopped: Vec<u32> = ctl
        .actuator()
        .inspector()
        .discover_children(root)?
        .into_iter()
        .map(|child| child.pid)
        .chain(std::iter::once(root))
        .filter(|pid| process_state(*pid).is_some_and(|s| s.is_stopped()))
        .collect();

    let output = parent
        .wait_with_output()
        .context("Failed to wait for throttled burner")?;
    let throttled = parse_count(&output.stdout)?;
    info!("Throttled process: counted {throttled} times");

    if !still_stopped.is_empty() {
        bail!("Processes left stopped after throttling: {still_stopped:?}");
    }
    if summary.suspensions == 0 {
        bail!("No burner child was ever suspended");
    }
    if throttled >= unthrottled {
        bail!("Throttled process counted {throttled} times, unthrottled {unthrottled}");
    }

    let ratio = throttled as f64 / unthrottled as f64;
    println!(
        "Self test passed: throttled process ran at {:.0}% of unthrottled speed",
        ratio * 100.0
    );
    Ok(())
}
