//! Application layer - Use case services.
//!
//! Services are thin orchestrators over the `ports` traits: they accept
//! domain types, call the injected enumerator/resolver/terminator, and
//! return domain types. Nothing here touches the OS directly except the
//! test bind in [`FreePortFinder`].

mod free_port;
mod kill_service;
mod list_service;
mod watch_service;

pub use free_port::FreePortFinder;
pub use kill_service::{CriticalGuard, KillService, CRITICAL_PIDS, DEFAULT_CRITICAL_NAMES};
pub use list_service::{sort_bindings, ListService, SortField};
pub use watch_service::{Snapshot, WatchService};
