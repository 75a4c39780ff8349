//! Process terminator port (interface).

use tokio_util::sync::CancellationToken;

use crate::domain::SignalPolicy;
use crate::error::Result;

/// Grace period between the cooperative request and the forced kill.
pub const GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(2);

/// Port for delivering termination signals.
///
/// With `policy.force` the immediate-kill signal is sent directly. Otherwise
/// a cooperative request is sent, followed by the immediate kill after
/// [`GRACE_PERIOD`] whether or not the process responded. Cancellation during
/// the wait yields `Error::Cancelled`.
pub trait Terminator: Send + Sync {
    fn terminate(
        &self,
        pid: i32,
        policy: SignalPolicy,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
