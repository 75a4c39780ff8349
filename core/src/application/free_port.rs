//! Free-port discovery by bind probing.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::domain::{PortRange, Protocol};
use crate::error::{Error, Result};

/// Finds ports nothing is bound to.
///
/// A port is free when binding `0.0.0.0:<port>` succeeds; the test socket
/// is released before the next port is tried. The answer is advisory: another
/// process may take the port right after.
#[derive(Debug, Default, Clone)]
pub struct FreePortFinder;

impl FreePortFinder {
    pub fn new() -> Self {
        Self
    }

    async fn is_free(protocol: Protocol, port: u16) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let bound = match protocol {
            Protocol::Tcp => TcpListener::bind(addr).await.map(drop),
            Protocol::Udp => UdpSocket::bind(addr).await.map(drop),
        };
        match bound {
            Ok(()) => true,
            Err(e) => {
                trace!(port = port, error = %e, "port in use");
                false
            }
        }
    }

    /// Up to `count` free ports in ascending order (`0` counts as `1`).
    ///
    /// Returns fewer than `count` when the range runs out, and
    /// `NoFreePort` when it holds none at all.
    pub async fn find_free_ports(
        &self,
        protocol: Protocol,
        range: Option<PortRange>,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<u16>> {
        let range = range.unwrap_or(PortRange::DEFAULT_FREE);
        if !range.is_valid() {
            return Err(Error::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        let count = count.max(1);

        let mut found = Vec::with_capacity(count.min(range.len()));
        for port in range.iter() {
            if found.len() >= count {
                break;
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if Self::is_free(protocol, port).await {
                found.push(port);
            }
        }

        if found.is_empty() {
            return Err(Error::NoFreePort {
                start: range.start,
                end: range.end,
            });
        }
        debug!(protocol = %protocol, found = found.len(), requested = count, "free ports found");
        Ok(found)
    }
}
