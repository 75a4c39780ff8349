//! Unix terminator using `kill(2)`.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::SignalPolicy;
use crate::error::{Error, Result};
use crate::ports::{Terminator, GRACE_PERIOD};

/// Liveness check interval during the grace period.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// SIGTERM, a cancellable grace period, then SIGKILL.
#[derive(Debug)]
pub struct UnixTerminator {
    grace: Duration,
}

impl UnixTerminator {
    pub fn new() -> Self {
        Self::with_grace_period(GRACE_PERIOD)
    }

    pub fn with_grace_period(grace: Duration) -> Self {
        Self { grace }
    }
}

impl Default for UnixTerminator {
    fn default() -> Self {
        Self::new()
    }
}

/// Deliver the first signal, classifying "no such process" and "not permitted".
fn send_first(pid: i32, signal: Signal) -> Result<()> {
    debug!(pid = pid, signal = %signal, "sending signal");
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(Error::ProcessExited { pid }),
        Err(Errno::EPERM) => Err(Error::PermissionDenied(format!(
            "not permitted to signal process {}",
            pid
        ))),
        Err(e) => Err(Error::KillFailed {
            pid,
            reason: e.to_string(),
        }),
    }
}

impl Terminator for UnixTerminator {
    async fn terminate(&self, pid: i32, policy: SignalPolicy, cancel: &CancellationToken) -> Result<()> {
        if pid <= 0 {
            return Err(Error::KillFailed {
                pid,
                reason: "refusing to signal a process group".to_string(),
            });
        }

        if policy.force {
            send_first(pid, Signal::SIGKILL)?;
            info!(pid = pid, "process killed");
            return Ok(());
        }

        send_first(pid, Signal::SIGTERM)?;

        let deadline = tokio::time::Instant::now() + self.grace;
        while tokio::time::Instant::now() < deadline {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL.min(self.grace)) => {}
                _ = cancel.cancelled() => {
                    debug!(pid = pid, "grace wait cancelled");
                    return Err(Error::Cancelled);
                }
            }
            if kill(Pid::from_raw(pid), None) == Err(Errno::ESRCH) {
                info!(pid = pid, "process exited after SIGTERM");
                return Ok(());
            }
        }

        debug!(pid = pid, signal = %Signal::SIGKILL, "grace period elapsed, sending signal");
        match kill(Pid::from_raw(pid), Signal::SIGKILL) {
            // Exited during the grace period.
            Ok(()) | Err(Errno::ESRCH) => {
                info!(pid = pid, "process terminated");
                Ok(())
            }
            Err(e) => Err(Error::KillFailed {
                pid,
                reason: format!("SIGKILL failed: {}", e),
            }),
        }
    }
}
