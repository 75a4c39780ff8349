//! macOS process metadata via `ps`.

use std::process::Stdio;

use tokio::process::Command;

use crate::domain::ProcessIdentity;
use crate::error::{Error, Result};

use super::{ps, ProcessSource};

/// Queries `/bin/ps` once per PID.
#[derive(Debug, Default, Clone)]
pub struct DarwinProcessSource;

impl DarwinProcessSource {
    pub fn new() -> Self {
        Self
    }

    /// Run `ps -p <pid> -o <format>`; `None` when the process is gone.
    async fn ps(&self, pid: i32, format: &str) -> Result<Option<String>> {
        let output = Command::new("/bin/ps")
            .args(["-p", &pid.to_string(), "-o", format])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::CommandFailed(format!("Failed to run ps: {}", e)))?;

        // ps exits 1 when no process matched.
        if !output.status.success() {
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!stdout.is_empty()).then_some(stdout))
    }
}

impl ProcessSource for DarwinProcessSource {
    async fn identify(&self, pid: i32) -> Result<Option<ProcessIdentity>> {
        let Some(line) = self.ps(pid, "user=,lstart=,comm=").await? else {
            return Ok(None);
        };
        ps::parse_identity(pid, &line)
            .map(Some)
            .ok_or_else(|| Error::ParseError(format!("unexpected ps output for {}: {}", pid, line)))
    }

    async fn cmdline(&self, pid: i32) -> Result<Option<String>> {
        self.ps(pid, "command=").await
    }
}
