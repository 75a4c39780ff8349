//! Subcommand implementations.

pub mod config;
pub mod free;
pub mod kill;
pub mod list;
pub mod watch;

use std::time::Duration;

use porthog_core::{CachingResolver, Config, ConfigStore, PlatformResolver};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::render::Format;

/// Everything a subcommand needs from the command line and config file.
pub struct Context {
    pub store: ConfigStore,
    pub config: Config,
    pub format: Format,
    pub timeout: Duration,
    /// Cancelled on Ctrl-C.
    pub shutdown: CancellationToken,
}

impl Context {
    /// A token for one operation: cancelled on Ctrl-C or after `timeout`.
    pub fn operation(&self) -> CancellationToken {
        let token = self.shutdown.child_token();
        let expiry = token.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    debug!(timeout_secs = timeout.as_secs(), "operation deadline reached");
                    expiry.cancel();
                }
                _ = expiry.cancelled() => {}
            }
        });
        token
    }

    pub fn resolver(&self) -> PlatformResolver {
        CachingResolver::with_ttl(Default::default(), self.config.cache_ttl())
    }

    /// Turn a core error into a user-facing one, naming timeouts as such.
    pub fn explain(&self, err: porthog_core::Error) -> anyhow::Error {
        if err.is_cancelled() && !self.shutdown.is_cancelled() {
            anyhow::anyhow!("timed out after {}s", self.timeout.as_secs())
        } else {
            anyhow::Error::new(err)
        }
    }
}
