//! Process resolver port (interface).

use tokio_util::sync::CancellationToken;

use crate::domain::PortBinding;
use crate::error::Result;

/// Port for attaching process identity to bindings.
pub trait ProcessResolver: Send + Sync {
    /// Attach `process` to every binding whose owner can be resolved.
    ///
    /// Per-PID permission failures never fail the call; only cancellation does.
    fn enrich(
        &self,
        bindings: Vec<PortBinding>,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<Vec<PortBinding>>> + Send;

    /// Evict the cached identity of one PID.
    fn invalidate_pid(&self, pid: i32);
}
