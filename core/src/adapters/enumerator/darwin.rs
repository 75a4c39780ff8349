//! macOS enumerator using `lsof` field output.

use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{Filter, Protocol};
use crate::error::{Error, Result};

use super::{lsof, Backend, Scan};

/// macOS-specific enumerator backend.
pub struct DarwinBackend;

impl DarwinBackend {
    pub fn new() -> Self {
        Self
    }

    /// Run `lsof -i<PROTO> -n -P -F pcn` and return its stdout.
    ///
    /// Exit code 1 with no output means no sockets of that protocol.
    async fn run_lsof(&self, protocol: Protocol, cancel: &CancellationToken) -> Result<String> {
        let selector = match protocol {
            Protocol::Tcp => "-iTCP",
            Protocol::Udp => "-iUDP",
        };

        let child = Command::new("/usr/sbin/lsof")
            .args([selector, "-n", "-P", "-F", "pcn"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            out = child => out.map_err(|e| Error::CommandFailed(format!("Failed to run lsof: {}", e)))?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| Error::ParseError(format!("Invalid UTF-8 in lsof output: {}", e)))?;

        if output.status.success() || (output.status.code() == Some(1) && stdout.trim().is_empty()) {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::CommandFailed(format!(
            "lsof {} exited with {}: {}",
            selector,
            output.status,
            stderr.trim()
        )))
    }
}

impl Default for DarwinBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for DarwinBackend {
    async fn scan(
        &self,
        protocols: &[Protocol],
        _sockets: &Filter,
        cancel: &CancellationToken,
    ) -> Result<Scan> {
        let mut scan = Scan::default();

        for &protocol in protocols {
            match self.run_lsof(protocol, cancel).await {
                Ok(stdout) => {
                    let parsed = lsof::parse_fields(&stdout, protocol);
                    debug!(protocol = %protocol, count = parsed.len(), "parsed lsof output");
                    scan.bindings.extend(parsed);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(protocol = %protocol, error = %e, "lsof query failed");
                    scan.warnings.push(format!("{}: {}", protocol, e));
                }
            }
        }

        Ok(scan)
    }
}
