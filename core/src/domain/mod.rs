//! Domain layer - Pure data models and predicates.
//!
//! This module contains the normalized socket and process models shared by
//! every platform backend. These types have no I/O dependencies and can be
//! tested in isolation.

mod binding;
mod filter;
mod partial;
mod policy;
mod process;

pub use binding::{PortBinding, Protocol, SocketState, UNRESOLVED_PID};
pub use filter::{validate_port, Filter, PortRange};
pub use partial::PartialResult;
pub use policy::{SignalPolicy, TerminateResult};
pub use process::ProcessIdentity;
