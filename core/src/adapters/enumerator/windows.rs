//! Windows enumerator using the IP helper owner-PID tables.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use windows::Win32::NetworkManagement::IpHelper::{
    GetExtendedTcpTable, GetExtendedUdpTable, TCP_TABLE_OWNER_PID_ALL, UDP_TABLE_OWNER_PID,
};

use crate::domain::{Filter, PortBinding, Protocol};
use crate::error::{Error, Result};

use super::{iphlp, Backend, Scan};

const AF_INET: u32 = 2;
const AF_INET6: u32 = 23;

const NO_ERROR: u32 = 0;
const ERROR_ACCESS_DENIED: u32 = 5;
const ERROR_INSUFFICIENT_BUFFER: u32 = 122;

/// The table may grow between the size query and the fill.
const MAX_ATTEMPTS: usize = 4;

/// Windows-specific enumerator backend.
pub struct WindowsBackend;

impl WindowsBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WindowsBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Size-query then fill one extended table.
fn fetch_table(protocol: Protocol, family: u32) -> Result<Vec<u8>> {
    let call = |buf: Option<&mut Vec<u8>>, size: &mut u32| -> u32 {
        let ptr = buf.map(|b| b.as_mut_ptr() as *mut core::ffi::c_void);
        // SAFETY: `ptr` is either None (size query) or points at a buffer of
        // exactly `*size` bytes.
        unsafe {
            match protocol {
                Protocol::Tcp => {
                    GetExtendedTcpTable(ptr, size, false, family, TCP_TABLE_OWNER_PID_ALL, 0)
                }
                Protocol::Udp => {
                    GetExtendedUdpTable(ptr, size, false, family, UDP_TABLE_OWNER_PID, 0)
                }
            }
        }
    };

    let mut size: u32 = 0;
    for _ in 0..MAX_ATTEMPTS {
        match call(None, &mut size) {
            NO_ERROR | ERROR_INSUFFICIENT_BUFFER => {}
            ERROR_ACCESS_DENIED => {
                return Err(Error::PermissionDenied(format!("{} owner table", protocol)))
            }
            code => {
                return Err(Error::CommandFailed(format!(
                    "{} table size query failed with code {}",
                    protocol, code
                )))
            }
        }

        let mut buffer = vec![0u8; size as usize];
        match call(Some(&mut buffer), &mut size) {
            NO_ERROR => {
                buffer.truncate(size as usize);
                return Ok(buffer);
            }
            ERROR_INSUFFICIENT_BUFFER => continue,
            code => {
                return Err(Error::CommandFailed(format!(
                    "{} table fill failed with code {}",
                    protocol, code
                )))
            }
        }
    }

    Err(Error::Timeout(format!(
        "{} table kept growing after {} attempts",
        protocol, MAX_ATTEMPTS
    )))
}

fn scan_blocking(protocols: &[Protocol], cancel: &CancellationToken) -> Result<Scan> {
    let mut scan = Scan::default();

    for &protocol in protocols {
        for family in [AF_INET, AF_INET6] {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let decoded: Result<Vec<PortBinding>> =
                fetch_table(protocol, family).map(|buf| match (protocol, family) {
                    (Protocol::Tcp, AF_INET) => iphlp::decode_tcp4_table(&buf),
                    (Protocol::Tcp, _) => iphlp::decode_tcp6_table(&buf),
                    (Protocol::Udp, AF_INET) => iphlp::decode_udp4_table(&buf),
                    (Protocol::Udp, _) => iphlp::decode_udp6_table(&buf),
                });

            match decoded {
                Ok(bindings) => {
                    debug!(protocol = %protocol, family = family, count = bindings.len(), "decoded owner table");
                    scan.bindings.extend(bindings);
                }
                Err(e) => {
                    warn!(protocol = %protocol, family = family, error = %e, "owner table unavailable");
                    scan.warnings.push(format!("{} (af {}): {}", protocol, family, e));
                }
            }
        }
    }

    Ok(scan)
}

impl Backend for WindowsBackend {
    async fn scan(
        &self,
        protocols: &[Protocol],
        _sockets: &Filter,
        cancel: &CancellationToken,
    ) -> Result<Scan> {
        let protocols = protocols.to_vec();
        let token = cancel.clone();

        tokio::task::spawn_blocking(move || scan_blocking(&protocols, &token))
            .await
            .map_err(|e| Error::CommandFailed(format!("enumeration task failed: {}", e)))?
    }
}
