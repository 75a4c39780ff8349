//! Socket enumerator port (interface).

use tokio_util::sync::CancellationToken;

use crate::domain::{Filter, PartialResult, PortBinding};
use crate::error::Result;

/// Port for listing bound sockets.
///
/// Implementations query the kernel socket tables and return normalized
/// bindings. Per-protocol failures degrade to warnings on the result.
pub trait Enumerator: Send + Sync {
    /// List every binding matching `filter` (all bindings when `None`).
    fn list(
        &self,
        filter: Option<&Filter>,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<PartialResult<Vec<PortBinding>>>> + Send;
}
