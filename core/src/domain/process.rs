//! Process identity model.

use serde::{Deserialize, Serialize};

/// Identity of an OS process at the time it was observed.
///
/// This is a comparison-only handle. Two identities denote the same process
/// iff both `pid` and `create_time_ms` are equal; a matching PID alone says
/// nothing, since PIDs are recycled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessIdentity {
    pub pid: i32,
    /// Process start time in Unix milliseconds; `0` when unknown.
    pub create_time_ms: i64,
    pub name: String,
    pub exe_path: String,
    /// Full command line, only populated on explicit request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmdline: Option<String>,
    pub username: String,
    /// The OS refused to disclose metadata for this process.
    pub permission_denied: bool,
}

impl ProcessIdentity {
    pub fn new(pid: i32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            ..Default::default()
        }
    }

    /// Placeholder identity for a process whose metadata we may not read.
    pub fn denied(pid: i32) -> Self {
        Self {
            pid,
            permission_denied: true,
            ..Default::default()
        }
    }

    pub fn with_create_time(mut self, create_time_ms: i64) -> Self {
        self.create_time_ms = create_time_ms;
        self
    }

    pub fn with_exe_path(mut self, exe_path: impl Into<String>) -> Self {
        self.exe_path = exe_path.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Whether any metadata beyond the PID was resolved.
    pub fn is_enriched(&self) -> bool {
        !self.permission_denied && !self.name.is_empty()
    }

    /// PID-reuse-safe identity comparison.
    pub fn is_same_process(&self, other: &ProcessIdentity) -> bool {
        self.pid == other.pid && self.create_time_ms == other.create_time_ms
    }
}
