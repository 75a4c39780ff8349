//! Error types for the porthog-core library.

use thiserror::Error;

use crate::domain::{Protocol, TerminateResult};

/// Result type alias for porthog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during enumeration, identification and termination.
#[derive(Error, Debug)]
pub enum Error {
    /// The OS refused access to one entity (a process, a table).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No binding matches the kill target.
    #[error("No process found listening on {protocol} port {port}")]
    NotFound { protocol: Protocol, port: u16 },

    /// The port's owner changed between the check and the action.
    #[error("Process ownership changed between check and action: {0}")]
    OwnershipConflict(String),

    /// The target is protected by the critical-process guard.
    #[error("Target is a critical system process: {}", .result.blocked_by.as_deref().unwrap_or("protected"))]
    CriticalProcess { result: Box<TerminateResult> },

    /// The target process vanished before it could be acted on.
    #[error("Target process {pid} has already exited")]
    ProcessExited { pid: i32 },

    /// Process identity could not be established, so no destructive action is taken.
    #[error("Cannot safely identify target process: {0}")]
    IdentityUnavailable(String),

    /// Platform primitive unavailable and no fallback applies.
    #[error("Operation not supported on this platform: {0}")]
    Unsupported(String),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// A kernel or tool interaction did not complete in time.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Every port in the searched range is in use.
    #[error("No free port available in range {start}-{end}")]
    NoFreePort { start: u16, end: u16 },

    /// Port number outside 1..=65535.
    #[error("Invalid port number: {0}")]
    InvalidPort(u32),

    /// Port range with `start == 0` or `start > end`.
    #[error("Invalid port range: {start}-{end}")]
    InvalidRange { start: u16, end: u16 },

    /// Signal delivery failed.
    #[error("Failed to kill process {pid}: {reason}")]
    KillFailed { pid: i32, reason: String },

    /// Failed to execute a system command.
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// Failed to parse kernel or tool output.
    #[error("Failed to parse output: {0}")]
    ParseError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Matchable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PermissionDenied,
    NotFound,
    OwnershipConflict,
    CriticalProcess,
    ProcessExited,
    IdentityUnavailable,
    Unsupported,
    Cancelled,
    Timeout,
    NoFreePort,
    InvalidPort,
    InvalidRange,
    KillFailed,
    Internal,
}

impl Error {
    /// Classify this error so callers can branch without matching on text.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::OwnershipConflict(_) => ErrorKind::OwnershipConflict,
            Error::CriticalProcess { .. } => ErrorKind::CriticalProcess,
            Error::ProcessExited { .. } => ErrorKind::ProcessExited,
            Error::IdentityUnavailable(_) => ErrorKind::IdentityUnavailable,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::NoFreePort { .. } => ErrorKind::NoFreePort,
            Error::InvalidPort(_) => ErrorKind::InvalidPort,
            Error::InvalidRange { .. } => ErrorKind::InvalidRange,
            Error::KillFailed { .. } => ErrorKind::KillFailed,
            Error::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ErrorKind::PermissionDenied
            }
            Error::CommandFailed(_)
            | Error::ParseError(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Config(_) => ErrorKind::Internal,
        }
    }

    /// The blocked result carried by a critical-process refusal.
    pub fn blocked_result(&self) -> Option<&TerminateResult> {
        match self {
            Error::CriticalProcess { result } => Some(result),
            _ => None,
        }
    }

    /// Whether this is a cancellation that should abort a batch.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
