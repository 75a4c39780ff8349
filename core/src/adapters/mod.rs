//! Adapters layer - External system implementations.
//!
//! This module contains implementations of the port traits defined in `ports`.
//! Each adapter picks its OS backend at compile time.

pub mod enumerator;
pub mod process;
pub mod terminator;

// Re-export main types for convenience
pub use enumerator::PlatformEnumerator;
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub use process::PlatformResolver;
pub use process::{CachingResolver, ProcessSource};
pub use terminator::PlatformTerminator;
