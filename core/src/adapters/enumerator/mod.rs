//! Socket enumerator adapters.
//!
//! Exactly one backend is compiled in per target:
//! - Linux: `SOCK_DIAG` netlink dump with a `/proc/net` fallback, owners
//!   resolved through the inode resolver
//! - macOS: `lsof -F pcn` field output
//! - Windows: IP helper owner-PID tables

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod darwin;

#[cfg(target_os = "windows")]
mod windows;

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
mod lsof;

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
mod iphlp;

#[cfg(target_os = "linux")]
pub use linux::inode::{resolve_pids, InodeResolution};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{Filter, PartialResult, PortBinding, Protocol};
use crate::error::{Error, Result};
use crate::ports::Enumerator;

/// Raw output of one backend pass, before filtering.
#[derive(Debug, Default)]
struct Scan {
    bindings: Vec<PortBinding>,
    warnings: Vec<String>,
    denied: usize,
}

/// Internal trait for platform-specific implementations.
trait Backend: Send + Sync {
    /// Dump every socket of the given protocols.
    ///
    /// `sockets` carries the filter without its PID dimension. Backends that
    /// resolve owners separately drop non-matching rows before doing so.
    fn scan(
        &self,
        protocols: &[Protocol],
        sockets: &Filter,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<Scan>> + Send;
}

/// The enumerator for the current platform.
pub struct PlatformEnumerator {
    #[cfg(target_os = "linux")]
    inner: linux::LinuxBackend,

    #[cfg(target_os = "macos")]
    inner: darwin::DarwinBackend,

    #[cfg(target_os = "windows")]
    inner: windows::WindowsBackend,

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    inner: UnsupportedBackend,
}

impl PlatformEnumerator {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "linux")]
            inner: linux::LinuxBackend::new(),

            #[cfg(target_os = "macos")]
            inner: darwin::DarwinBackend::new(),

            #[cfg(target_os = "windows")]
            inner: windows::WindowsBackend::new(),

            #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
            inner: UnsupportedBackend,
        }
    }

    /// Read procfs tables and fd links below `root` instead of `/proc`.
    ///
    /// The netlink dump still queries the live kernel.
    #[cfg(target_os = "linux")]
    pub fn with_proc_root(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            inner: linux::LinuxBackend::with_proc_root(root.into()),
        }
    }
}

impl Default for PlatformEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Enumerator for PlatformEnumerator {
    async fn list(
        &self,
        filter: Option<&Filter>,
        cancel: &CancellationToken,
    ) -> Result<PartialResult<Vec<PortBinding>>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let protocols: Vec<Protocol> = Protocol::ALL
            .into_iter()
            .filter(|p| filter.map_or(true, |f| f.wants_protocol(*p)))
            .collect();

        let sockets = filter.map(Filter::without_pids).unwrap_or_default();
        let scan = self.inner.scan(&protocols, &sockets, cancel).await?;
        debug!(
            bindings = scan.bindings.len(),
            warnings = scan.warnings.len(),
            denied = scan.denied,
            "enumeration pass complete"
        );
        Ok(scan.into_result(filter))
    }
}

impl Scan {
    /// Apply the full filter and carry warnings and denials over.
    fn into_result(self, filter: Option<&Filter>) -> PartialResult<Vec<PortBinding>> {
        let mut result = PartialResult::new(match filter {
            Some(f) => f.apply(self.bindings),
            None => self.bindings,
        });
        for warning in self.warnings {
            result.warn(warning);
        }
        result.record_denied(self.denied);
        result
    }
}

/// Backend for targets without a socket-table primitive.
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
struct UnsupportedBackend;

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
impl Backend for UnsupportedBackend {
    async fn scan(
        &self,
        _protocols: &[Protocol],
        _sockets: &Filter,
        _cancel: &CancellationToken,
    ) -> Result<Scan> {
        Err(Error::Unsupported(format!(
            "socket enumeration is not implemented for {}",
            std::env::consts::OS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SocketState;
    use std::net::{IpAddr, Ipv4Addr};

    fn listener(port: u16, pid: i32) -> PortBinding {
        PortBinding::new(Protocol::Tcp, IpAddr::V4(Ipv4Addr::LOCALHOST), port, SocketState::Listen)
            .with_pid(pid)
    }

    #[test]
    fn test_denied_scan_is_partial() {
        let scan = Scan {
            bindings: vec![listener(22, -1), listener(3000, 42)],
            warnings: vec!["2 process fd tables unreadable; 1 sockets have no known owner".into()],
            denied: 2,
        };
        let result = scan.into_result(None);
        assert!(result.partial);
        assert_eq!(result.denied_count, 2);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.data.len(), 2);
    }

    #[test]
    fn test_pid_filter_applies_after_scan() {
        let scan = Scan {
            bindings: vec![listener(22, -1), listener(3000, 42)],
            ..Scan::default()
        };
        let result = scan.into_result(Some(&Filter::new().pid(42)));
        assert!(!result.partial);
        assert_eq!(result.data, vec![listener(3000, 42)]);
    }
}
