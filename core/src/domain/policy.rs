//! Termination policy and outcome.

use serde::Serialize;

use super::{ProcessIdentity, Protocol};

/// How a kill should be carried out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalPolicy {
    /// Skip the cooperative request and kill immediately.
    pub force: bool,
    /// Allow targeting processes on the critical denylist.
    pub force_system: bool,
    /// Identify and check only; never send a signal.
    pub dry_run: bool,
}

impl SignalPolicy {
    pub fn graceful() -> Self {
        Self::default()
    }

    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}

/// Outcome of a kill request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateResult {
    pub pid: i32,
    pub port: u16,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessIdentity>,
    pub killed: bool,
    pub dry_run: bool,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
}

impl TerminateResult {
    pub fn new(pid: i32, port: u16, protocol: Protocol, process: Option<ProcessIdentity>) -> Self {
        Self {
            pid,
            port,
            protocol,
            process,
            killed: false,
            dry_run: false,
            blocked: false,
            blocked_by: None,
        }
    }

    pub fn process_name(&self) -> Option<&str> {
        self.process
            .as_ref()
            .map(|p| p.name.as_str())
            .filter(|n| !n.is_empty())
    }
}
