//! PTY Signal Handling
//!
//! Sends SIGTERM/SIGKILL to the emulator and implements the
//! terminate-then-kill shutdown used on every failure path.

use crate::error::{Error, Result};
use std::time::Duration;

/// Signal types that can be sent to the emulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Termination signal (graceful shutdown)
    Terminate,
    /// Kill signal (forceful termination)
    Kill,
}

/// How often the exit check runs while waiting out the grace period
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Send a signal to a process by PID
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;

    let nix_signal = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };

    kill(Pid::from_raw(pid as i32), nix_signal).map_err(|e| Error::SignalSendFailed {
        signal: format!("{:?}", signal),
        reason: e.to_string(),
    })
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, signal: Signal) -> Result<()> {
    Err(Error::SignalSendFailed {
        signal: format!("{:?}", signal),
        reason: format!("signals are not supported on {}", std::env::consts::OS),
    })
}

/// Terminate a process gracefully: SIGTERM, wait up to `grace`, then SIGKILL.
///
/// `has_exited` is polled during the grace period; it should reap the child
/// so that a zombie does not count as running.
pub async fn terminate_gracefully<F>(pid: u32, grace: Duration, mut has_exited: F) -> Result<()>
where
    F: FnMut() -> bool + Send,
{
    use tokio::time::{sleep, Instant};

    if has_exited() {
        return Ok(());
    }

    debug!("Sending SIGTERM to pid {}", pid);
    if let Err(e) = send_signal(pid, Signal::Terminate) {
        // The process may have exited between the check and the signal
        if has_exited() {
            return Ok(());
        }
        return Err(e);
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if has_exited() {
            debug!("pid {} exited after SIGTERM", pid);
            return Ok(());
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }

    if has_exited() {
        return Ok(());
    }

    warn!(
        "pid {} still running {}ms after SIGTERM, sending SIGKILL",
        pid,
        grace.as_millis()
    );
    send_signal(pid, Signal::Kill)?;

    // Reap so the emulator does not linger as a zombie
    for _ in 0..10 {
        if has_exited() {
            break;
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }

    Ok(())
}
