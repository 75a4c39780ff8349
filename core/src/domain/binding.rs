//! Socket binding domain models.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ProcessIdentity;

// ============================================================================
// Protocol
// ============================================================================

/// Transport protocol of a bound socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Both protocols, in enumeration order.
    pub const ALL: [Protocol; 2] = [Protocol::Tcp, Protocol::Udp];

    /// IANA protocol number (TCP=6, UDP=17).
    pub fn number(&self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol: {}", other)),
        }
    }
}

// ============================================================================
// SocketState
// ============================================================================

/// Normalized socket state across all platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SocketState {
    /// The source table reported a state code we do not recognize.
    #[default]
    Unknown,
    Listen,
    Established,
    TimeWait,
    CloseWait,
    Closed,
}

impl SocketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocketState::Unknown => "UNKNOWN",
            SocketState::Listen => "LISTEN",
            SocketState::Established => "ESTABLISHED",
            SocketState::TimeWait => "TIME_WAIT",
            SocketState::CloseWait => "CLOSE_WAIT",
            SocketState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocketState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "LISTEN" => Ok(SocketState::Listen),
            "ESTABLISHED" => Ok(SocketState::Established),
            "TIME_WAIT" => Ok(SocketState::TimeWait),
            "CLOSE_WAIT" => Ok(SocketState::CloseWait),
            "CLOSED" => Ok(SocketState::Closed),
            "UNKNOWN" => Ok(SocketState::Unknown),
            other => Err(format!("unknown socket state: {}", other)),
        }
    }
}

// ============================================================================
// PortBinding
// ============================================================================

/// PID stored when the owner of a socket could not be resolved.
pub const UNRESOLVED_PID: i32 = -1;

/// A socket bound to a local port, with its owning process when known.
///
/// Bindings are re-created on every enumeration. Consumers only ever attach
/// `process`; the socket fields are never rewritten after the enumerator
/// hands the binding out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortBinding {
    pub protocol: Protocol,
    pub local_ip: IpAddr,
    pub local_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    pub state: SocketState,
    /// Owning PID. `0` is a system PID on platforms that report it;
    /// [`UNRESOLVED_PID`] marks an owner that could not be seen.
    pub pid: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessIdentity>,
}

impl PortBinding {
    /// Create a binding with no remote endpoint and no known owner.
    pub fn new(protocol: Protocol, local_ip: IpAddr, local_port: u16, state: SocketState) -> Self {
        Self {
            protocol,
            local_ip,
            local_port,
            remote_ip: None,
            remote_port: None,
            state,
            pid: 0,
            process: None,
        }
    }

    /// Set the remote endpoint. Unspecified endpoints (`0.0.0.0:0`, `[::]:0`) are dropped.
    pub fn with_remote(mut self, ip: IpAddr, port: u16) -> Self {
        if ip.is_unspecified() && port == 0 {
            self.remote_ip = None;
            self.remote_port = None;
        } else {
            self.remote_ip = Some(ip);
            self.remote_port = Some(port);
        }
        self
    }

    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = pid;
        self
    }

    pub fn is_listening(&self) -> bool {
        self.state == SocketState::Listen
    }

    /// Whether the owning process is known.
    pub fn has_owner(&self) -> bool {
        self.pid > 0
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.local_ip, self.local_port)
    }

    /// Local address formatted as `ip:port` (`[ip]:port` for IPv6).
    pub fn local_addr(&self) -> String {
        self.socket_addr().to_string()
    }

    /// Remote address formatted like [`local_addr`](Self::local_addr), if any.
    pub fn remote_addr(&self) -> Option<String> {
        let ip = self.remote_ip?;
        Some(SocketAddr::new(ip, self.remote_port.unwrap_or(0)).to_string())
    }

    /// Name of the owning process, if resolved.
    pub fn process_name(&self) -> Option<&str> {
        self.process
            .as_ref()
            .map(|p| p.name.as_str())
            .filter(|n| !n.is_empty())
    }
}

impl Default for PortBinding {
    fn default() -> Self {
        Self::new(
            Protocol::Tcp,
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            0,
            SocketState::Unknown,
        )
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.protocol, self.local_addr(), self.state)?;
        if let Some(remote) = self.remote_addr() {
            write!(f, " -> {}", remote)?;
        }
        match self.process_name() {
            Some(name) => write!(f, " (PID: {}, Process: {})", self.pid, name),
            None => write!(f, " (PID: {})", self.pid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_protocol_roundtrip_text() {
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("udp".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert!("sctp".parse::<Protocol>().is_err());
        assert_eq!(Protocol::Udp.to_string(), "udp");
        assert_eq!(Protocol::Tcp.number(), 6);
        assert_eq!(Protocol::Udp.number(), 17);
    }

    #[test]
    fn test_state_parse() {
        assert_eq!("listen".parse::<SocketState>().unwrap(), SocketState::Listen);
        assert_eq!("time-wait".parse::<SocketState>().unwrap(), SocketState::TimeWait);
        assert_eq!(SocketState::CloseWait.to_string(), "CLOSE_WAIT");
        assert_eq!(SocketState::default(), SocketState::Unknown);
    }

    #[test]
    fn test_unspecified_remote_is_dropped() {
        let b = PortBinding::new(
            Protocol::Tcp,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            8080,
            SocketState::Listen,
        )
        .with_remote(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        assert_eq!(b.remote_ip, None);
        assert_eq!(b.remote_addr(), None);

        let b = b.with_remote(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 51000);
        assert_eq!(b.remote_addr().as_deref(), Some("10.0.0.2:51000"));
    }

    #[test]
    fn test_address_formatting() {
        let b = PortBinding::new(
            Protocol::Tcp,
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            3000,
            SocketState::Listen,
        )
        .with_pid(42);
        assert_eq!(b.local_addr(), "[::1]:3000");
        assert!(b.has_owner());
        assert!(b.is_listening());
        assert_eq!(b.to_string(), "tcp [::1]:3000 LISTEN (PID: 42)");
    }
}
