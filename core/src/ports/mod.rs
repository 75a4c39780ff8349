//! Ports layer - Trait definitions (interfaces).
//!
//! This module defines the interfaces that the application layer uses
//! to interact with the operating system. Implementations live in `adapters`.

mod enumerator;
mod resolver;
mod terminator;

pub use enumerator::Enumerator;
pub use resolver::ProcessResolver;
pub use terminator::{Terminator, GRACE_PERIOD};
