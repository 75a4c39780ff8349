//! Declarative filtering over port bindings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{PortBinding, Protocol, SocketState};
use crate::error::{Error, Result};

// ============================================================================
// PortRange
// ============================================================================

/// Inclusive port range. Valid iff `1 <= start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// Range searched when the caller gives none: the non-privileged ports.
    pub const DEFAULT_FREE: PortRange = PortRange {
        start: 1024,
        end: 65535,
    };

    /// Create a validated range.
    pub fn new(start: u16, end: u16) -> Result<Self> {
        let range = Self { start, end };
        if range.is_valid() {
            Ok(range)
        } else {
            Err(Error::InvalidRange { start, end })
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start >= 1 && self.start <= self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    /// Number of ports in the range (0 for an invalid range).
    pub fn len(&self) -> usize {
        if self.start > self.end {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

/// Check a user-supplied port number (`1..=65535`).
pub fn validate_port(port: u32) -> Result<u16> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(Error::InvalidPort(port)),
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for PortRange {
    type Err = Error;

    /// Parse `"start-end"` or a single port `"port"`.
    fn from_str(s: &str) -> Result<Self> {
        let parse = |v: &str| -> Result<u16> {
            v.trim()
                .parse::<u16>()
                .map_err(|_| Error::ParseError(format!("invalid port in range: {:?}", v)))
        };
        match s.split_once('-') {
            Some((a, b)) => PortRange::new(parse(a)?, parse(b)?),
            None => {
                let port = parse(s)?;
                PortRange::new(port, port)
            }
        }
    }
}

// ============================================================================
// Filter
// ============================================================================

/// Conjunctive predicate over bindings. Empty dimensions do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub protocols: Vec<Protocol>,
    pub ports: Vec<u16>,
    pub port_range: Option<PortRange>,
    pub pids: Vec<i32>,
    pub states: Vec<SocketState>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        if !self.protocols.contains(&protocol) {
            self.protocols.push(protocol);
        }
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }

    pub fn range(mut self, range: PortRange) -> Self {
        self.port_range = Some(range);
        self
    }

    pub fn pid(mut self, pid: i32) -> Self {
        self.pids.push(pid);
        self
    }

    pub fn state(mut self, state: SocketState) -> Self {
        self.states.push(state);
        self
    }

    /// Whether bindings of `protocol` can pass this filter at all.
    ///
    /// Enumerators use this to skip whole sub-queries.
    pub fn wants_protocol(&self, protocol: Protocol) -> bool {
        self.protocols.is_empty() || self.protocols.contains(&protocol)
    }

    /// This filter with the PID dimension removed.
    ///
    /// Matches on what a socket table row carries before its owner is known.
    pub fn without_pids(&self) -> Filter {
        Filter {
            pids: Vec::new(),
            ..self.clone()
        }
    }

    pub fn matches(&self, binding: &PortBinding) -> bool {
        if !self.wants_protocol(binding.protocol) {
            return false;
        }
        if !self.ports.is_empty() && !self.ports.contains(&binding.local_port) {
            return false;
        }
        if let Some(range) = &self.port_range {
            if !range.contains(binding.local_port) {
                return false;
            }
        }
        if !self.pids.is_empty() && !self.pids.contains(&binding.pid) {
            return false;
        }
        if !self.states.is_empty() && !self.states.contains(&binding.state) {
            return false;
        }
        true
    }

    /// Keep only the matching bindings, preserving order.
    pub fn apply(&self, bindings: Vec<PortBinding>) -> Vec<PortBinding> {
        bindings.into_iter().filter(|b| self.matches(b)).collect()
    }
}
