//! Windows terminator: `taskkill` close request, then `TerminateProcess`.
//!
//! The process handle is opened once, before the close request, and every
//! later step goes through it. An open handle keeps the PID from being
//! reassigned, so the forced kill can only reach the identified process.

use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use windows::Win32::Foundation::{
    CloseHandle, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER, HANDLE,
};
use windows::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, TerminateProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    PROCESS_TERMINATE,
};

use crate::domain::SignalPolicy;
use crate::error::{Error, Result};
use crate::ports::{Terminator, GRACE_PERIOD};

/// Liveness check interval during the grace period.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exit code `GetExitCodeProcess` reports for a running process.
const STILL_ACTIVE: u32 = 259;

fn is_running(exit_code: u32) -> bool {
    exit_code == STILL_ACTIVE
}

/// Terminate and query rights on one process, closed on drop.
struct ProcessHandle {
    pid: i32,
    raw: HANDLE,
}

// SAFETY: a process handle is a kernel object reference usable from any thread.
unsafe impl Send for ProcessHandle {}
// SAFETY: the handle is only passed by value to thread-safe kernel calls.
unsafe impl Sync for ProcessHandle {}

impl ProcessHandle {
    fn open(pid: i32) -> Result<Self> {
        let access = PROCESS_TERMINATE | PROCESS_QUERY_LIMITED_INFORMATION;
        // SAFETY: plain FFI call; the returned handle is owned by `Self`.
        match unsafe { OpenProcess(access, false, pid as u32) } {
            Ok(raw) => Ok(Self { pid, raw }),
            Err(e) if e.code() == ERROR_INVALID_PARAMETER.to_hresult() => {
                Err(Error::ProcessExited { pid })
            }
            Err(e) if e.code() == ERROR_ACCESS_DENIED.to_hresult() => {
                Err(Error::PermissionDenied(format!("OpenProcess({}): {}", pid, e)))
            }
            Err(e) => Err(Error::KillFailed {
                pid,
                reason: format!("OpenProcess failed: {}", e),
            }),
        }
    }

    fn has_exited(&self) -> Result<bool> {
        let mut code = 0u32;
        // SAFETY: `raw` is open for the lifetime of `self`.
        unsafe { GetExitCodeProcess(self.raw, &mut code) }.map_err(|e| Error::KillFailed {
            pid: self.pid,
            reason: format!("GetExitCodeProcess failed: {}", e),
        })?;
        Ok(!is_running(code))
    }

    fn terminate(&self) -> Result<()> {
        // SAFETY: `raw` is open for the lifetime of `self`.
        match unsafe { TerminateProcess(self.raw, 1) } {
            Ok(()) => Ok(()),
            // Terminating a process that already exited is refused.
            Err(_) if self.has_exited().unwrap_or(false) => Ok(()),
            Err(e) => Err(Error::KillFailed {
                pid: self.pid,
                reason: format!("TerminateProcess failed: {}", e),
            }),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // SAFETY: the handle was returned by a successful `OpenProcess`.
        unsafe {
            let _ = CloseHandle(self.raw);
        }
    }
}

#[derive(Debug)]
pub struct WindowsTerminator {
    grace: Duration,
}

impl WindowsTerminator {
    pub fn new() -> Self {
        Self::with_grace_period(GRACE_PERIOD)
    }

    pub fn with_grace_period(grace: Duration) -> Self {
        Self { grace }
    }

    /// Ask the process to close (`taskkill /PID` without `/F`).
    async fn request_close(&self, pid: i32) -> Result<()> {
        debug!(pid = pid, "Executing taskkill");
        let output = Command::new("taskkill")
            .arg("/PID")
            .arg(pid.to_string())
            .output()
            .await
            .map_err(|e| Error::CommandFailed(format!("Failed to run taskkill: {}", e)))?;

        if output.status.success() {
            return Ok(());
        }

        let combined = format!(
            "{} {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if combined.contains("not found") || combined.contains("could not be found") {
            return Err(Error::ProcessExited { pid });
        }
        if combined.contains("Access is denied") {
            return Err(Error::PermissionDenied(format!("taskkill /PID {}", pid)));
        }
        // Console apps ignore close requests; TerminateProcess follows anyway.
        warn!(pid = pid, output = %combined.trim(), "taskkill close request failed");
        Ok(())
    }
}

impl Default for WindowsTerminator {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminator for WindowsTerminator {
    async fn terminate(&self, pid: i32, policy: SignalPolicy, cancel: &CancellationToken) -> Result<()> {
        if pid <= 0 {
            return Err(Error::KillFailed {
                pid,
                reason: "refusing to terminate a system process id".to_string(),
            });
        }

        let process = ProcessHandle::open(pid)?;

        if policy.force {
            process.terminate()?;
            info!(pid = pid, "process killed");
            return Ok(());
        }

        self.request_close(pid).await?;

        let deadline = tokio::time::Instant::now() + self.grace;
        while tokio::time::Instant::now() < deadline {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL.min(self.grace)) => {}
                _ = cancel.cancelled() => {
                    debug!(pid = pid, "grace wait cancelled");
                    return Err(Error::Cancelled);
                }
            }
            if process.has_exited()? {
                info!(pid = pid, "process exited after close request");
                return Ok(());
            }
        }

        debug!(pid = pid, "grace period elapsed, terminating");
        process.terminate()?;
        info!(pid = pid, "process terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    fn spawn_pinger() -> tokio::process::Child {
        tokio::process::Command::new("ping")
            .args(["-n", "30", "127.0.0.1"])
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_still_active_exit_code() {
        assert!(is_running(STILL_ACTIVE));
        assert!(!is_running(0));
        assert!(!is_running(1));
    }

    #[tokio::test]
    async fn test_force_kill() {
        let mut child = spawn_pinger();
        let pid = child.id().unwrap() as i32;

        WindowsTerminator::new()
            .terminate(pid, SignalPolicy::forced(), &CancellationToken::new())
            .await
            .unwrap();

        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_handle_outlives_target() {
        let mut child = spawn_pinger();
        let pid = child.id().unwrap() as i32;
        let process = ProcessHandle::open(pid).unwrap();
        assert!(!process.has_exited().unwrap());

        child.kill().await.unwrap();
        child.wait().await.unwrap();

        // The held handle still answers for the original process.
        assert!(process.has_exited().unwrap());
        assert!(process.terminate().is_ok());
    }

    #[tokio::test]
    async fn test_console_process_is_terminated_after_grace() {
        let mut child = spawn_pinger();
        let pid = child.id().unwrap() as i32;

        WindowsTerminator::with_grace_period(Duration::from_millis(300))
            .terminate(pid, SignalPolicy::graceful(), &CancellationToken::new())
            .await
            .unwrap();

        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_non_positive_pid_is_refused() {
        let err = WindowsTerminator::new()
            .terminate(0, SignalPolicy::forced(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KillFailed { pid: 0, .. }));
    }
}
