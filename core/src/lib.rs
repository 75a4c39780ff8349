//! Porthog Core Library
//!
//! Cross-platform socket-to-process discovery and TOCTOU-safe termination:
//! - Enumerate TCP/UDP bindings (IPv4 and IPv6) from the kernel socket tables
//! - Attach owning process identities through a TTL cache
//! - Kill the process on a port only after re-checking it is still the same process
//! - Search for free ports
//!
//! # Architecture
//! This library follows hexagonal architecture (ports & adapters):
//! - `domain`: Pure data models and filtering
//! - `ports`: Trait definitions (interfaces)
//! - `adapters`: Platform implementations
//! - `application`: Use case services
//!
//! # Platform Support
//! - Linux: `NETLINK_SOCK_DIAG` with `/proc/net/*` fallback, `/proc/<pid>` metadata
//! - macOS: `lsof -F` and `ps`
//! - Windows: IP helper owner-PID tables and the process/token APIs

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

pub use adapters::{CachingResolver, PlatformEnumerator, PlatformTerminator};
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub use adapters::PlatformResolver;
pub use application::{
    FreePortFinder, KillService, ListService, Snapshot, SortField, WatchService,
};
pub use config::{Config, ConfigStore, OutputFormat};
pub use domain::{
    Filter, PartialResult, PortBinding, PortRange, ProcessIdentity, Protocol, SignalPolicy,
    SocketState, TerminateResult, UNRESOLVED_PID,
};
pub use error::{Error, ErrorKind, Result};
