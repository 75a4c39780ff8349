//! Process terminator adapters.
//!
//! Platform-specific implementations of the [`Terminator`] port.

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

use tokio_util::sync::CancellationToken;

use crate::domain::SignalPolicy;
use crate::error::Result;
use crate::ports::Terminator;

/// The terminator for the current platform.
#[derive(Debug, Default)]
pub struct PlatformTerminator {
    #[cfg(unix)]
    inner: unix::UnixTerminator,

    #[cfg(windows)]
    inner: windows::WindowsTerminator,
}

impl PlatformTerminator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the wait between the cooperative request and the forced kill.
    pub fn with_grace_period(grace: std::time::Duration) -> Self {
        Self {
            #[cfg(unix)]
            inner: unix::UnixTerminator::with_grace_period(grace),

            #[cfg(windows)]
            inner: windows::WindowsTerminator::with_grace_period(grace),
        }
    }
}

impl Terminator for PlatformTerminator {
    async fn terminate(&self, pid: i32, policy: SignalPolicy, cancel: &CancellationToken) -> Result<()> {
        #[cfg(any(unix, windows))]
        {
            self.inner.terminate(pid, policy, cancel).await
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = (pid, policy, cancel);
            Err(crate::error::Error::Unsupported(
                "process termination is not implemented for this platform".to_string(),
            ))
        }
    }
}
