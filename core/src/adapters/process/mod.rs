//! Process identity resolution.
//!
//! [`CachingResolver`] implements [`ProcessResolver`] over a per-OS
//! [`ProcessSource`], keeping identities in a TTL-bounded cache.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod darwin;

#[cfg(target_os = "windows")]
mod windows;

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
mod ps;

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::domain::{PortBinding, ProcessIdentity};
use crate::error::{Error, Result};
use crate::ports::ProcessResolver;

#[cfg(target_os = "linux")]
pub use linux::LinuxProcessSource;

#[cfg(target_os = "macos")]
pub use darwin::DarwinProcessSource;

#[cfg(target_os = "windows")]
pub use self::windows::WindowsProcessSource;

/// Default lifetime of a cached identity.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Source of process metadata: the only place the resolver touches the OS.
pub trait ProcessSource: Send + Sync {
    /// Look up one process.
    ///
    /// Returns `Ok(None)` when the process no longer exists and
    /// `Err(Error::PermissionDenied)` when the OS refuses access.
    fn identify(
        &self,
        pid: i32,
    ) -> impl std::future::Future<Output = Result<Option<ProcessIdentity>>> + Send;

    /// Full command line of one process, `Ok(None)` when gone.
    fn cmdline(&self, pid: i32) -> impl std::future::Future<Output = Result<Option<String>>> + Send;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    identity: ProcessIdentity,
    expires_at: Instant,
}

/// TTL-cached [`ProcessResolver`].
pub struct CachingResolver<S: ProcessSource> {
    source: S,
    ttl: Duration,
    cache: RwLock<HashMap<i32, CacheEntry>>,
}

/// Resolver over the current platform's process table.
#[cfg(target_os = "linux")]
pub type PlatformResolver = CachingResolver<LinuxProcessSource>;

#[cfg(target_os = "macos")]
pub type PlatformResolver = CachingResolver<DarwinProcessSource>;

#[cfg(target_os = "windows")]
pub type PlatformResolver = CachingResolver<WindowsProcessSource>;

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
impl PlatformResolver {
    /// Resolver for the current platform with the default TTL.
    pub fn platform() -> Self {
        Self::new(Default::default())
    }
}

impl<S: ProcessSource> CachingResolver<S> {
    pub fn new(source: S) -> Self {
        Self::with_ttl(source, DEFAULT_TTL)
    }

    pub fn with_ttl(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Access the underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Number of live (unexpired) cache entries.
    pub fn cached_len(&self) -> usize {
        let now = Instant::now();
        self.cache
            .read()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    fn lookup(&self, pid: i32) -> Option<ProcessIdentity> {
        let cache = self.cache.read();
        let entry = cache.get(&pid)?;
        (entry.expires_at > Instant::now()).then(|| entry.identity.clone())
    }

    fn store(&self, identity: ProcessIdentity) {
        let now = Instant::now();
        let mut cache = self.cache.write();
        cache.retain(|_, e| e.expires_at > now);
        cache.insert(
            identity.pid,
            CacheEntry {
                identity,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Resolve one PID through the cache.
    ///
    /// `None` means the process is gone or could not be queried.
    pub async fn resolve(&self, pid: i32) -> Option<ProcessIdentity> {
        if let Some(hit) = self.lookup(pid) {
            trace!(pid = pid, "process cache hit");
            return Some(hit);
        }

        match self.source.identify(pid).await {
            Ok(Some(identity)) => {
                self.store(identity.clone());
                Some(identity)
            }
            Ok(None) => {
                debug!(pid = pid, "process exited before it could be identified");
                None
            }
            Err(Error::PermissionDenied(reason)) => {
                debug!(pid = pid, reason = %reason, "process metadata denied");
                let identity = ProcessIdentity::denied(pid);
                self.store(identity.clone());
                Some(identity)
            }
            Err(e) => {
                warn!(pid = pid, error = %e, "failed to identify process");
                None
            }
        }
    }

    /// Fill `process.cmdline` for every enriched binding.
    ///
    /// Command lines are never cached and only fetched on this explicit call.
    pub async fn load_cmdlines(
        &self,
        bindings: &mut [PortBinding],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut fetched: HashMap<i32, Option<String>> = HashMap::new();

        for binding in bindings.iter_mut() {
            let Some(process) = binding.process.as_mut() else {
                continue;
            };
            if process.permission_denied || process.cmdline.is_some() {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if !fetched.contains_key(&process.pid) {
                let cmdline = match self.source.cmdline(process.pid).await {
                    Ok(c) => c,
                    Err(e) => {
                        debug!(pid = process.pid, error = %e, "command line unavailable");
                        None
                    }
                };
                fetched.insert(process.pid, cmdline);
            }
            process.cmdline = fetched.get(&process.pid).cloned().flatten();
        }

        Ok(())
    }
}

impl<S: ProcessSource> ProcessResolver for CachingResolver<S> {
    async fn enrich(
        &self,
        mut bindings: Vec<PortBinding>,
        cancel: &CancellationToken,
    ) -> Result<Vec<PortBinding>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let pids: BTreeSet<i32> = bindings
            .iter()
            .filter(|b| b.has_owner())
            .map(|b| b.pid)
            .collect();

        let mut identities: HashMap<i32, ProcessIdentity> = HashMap::with_capacity(pids.len());
        for pid in pids {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(identity) = self.resolve(pid).await {
                identities.insert(pid, identity);
            }
        }

        for binding in bindings.iter_mut() {
            if let Some(identity) = identities.get(&binding.pid) {
                binding.process = Some(identity.clone());
            }
        }

        Ok(bindings)
    }

    fn invalidate_pid(&self, pid: i32) {
        if self.cache.write().remove(&pid).is_some() {
            trace!(pid = pid, "evicted cached process identity");
        }
    }
}
