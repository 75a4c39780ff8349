//! Two-phase, identity-revalidating kill-by-port.
//!
//! `IDENTIFY -> CHECK_CRITICAL -> (DRY_RUN | REVALIDATE -> EXECUTE)`.
//! The second enumeration is only issued after the critical check has passed,
//! and no signal is sent unless the freshly observed owner is still the same
//! process (same PID and same creation time) that was identified first.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{
    Filter, PortBinding, ProcessIdentity, Protocol, SignalPolicy, SocketState, TerminateResult,
};
use crate::error::{Error, Result};
use crate::ports::{Enumerator, ProcessResolver, Terminator};

/// Init and kernel PIDs that are never targeted without `force_system`.
#[cfg(windows)]
pub const CRITICAL_PIDS: &[i32] = &[0, 1, 4];

/// Init and kernel PIDs that are never targeted without `force_system`.
#[cfg(not(windows))]
pub const CRITICAL_PIDS: &[i32] = &[0, 1];

/// Process names protected by default (compared case-insensitively).
pub const DEFAULT_CRITICAL_NAMES: &[&str] = &[
    "systemd",
    "launchd",
    "init",
    "kernel_task",
    "csrss.exe",
    "smss.exe",
    "wininit.exe",
    "winlogon.exe",
    "services.exe",
    "lsass.exe",
];

/// Decides whether a target is a critical system process.
#[derive(Debug, Clone)]
pub struct CriticalGuard {
    pids: HashSet<i32>,
    names: HashSet<String>,
}

impl CriticalGuard {
    /// Guard over the platform's critical PIDs and the given names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            pids: CRITICAL_PIDS.iter().copied().collect(),
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// The reason `pid` is protected, if it is.
    pub fn check(&self, pid: i32, process: Option<&ProcessIdentity>) -> Option<String> {
        if self.pids.contains(&pid) {
            return Some(format!("critical system PID {}", pid));
        }
        let name = process.map(|p| p.name.to_lowercase())?;
        self.names
            .contains(&name)
            .then(|| format!("critical system process '{}'", name))
    }
}

impl Default for CriticalGuard {
    fn default() -> Self {
        Self::new(DEFAULT_CRITICAL_NAMES)
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Kill-by-port use case.
///
/// Failures are never retried here; retrying a TOCTOU failure is the
/// caller's decision.
pub struct KillService<E, R, T>
where
    E: Enumerator,
    R: ProcessResolver,
    T: Terminator,
{
    enumerator: E,
    resolver: R,
    terminator: T,
    guard: CriticalGuard,
}

impl<E, R, T> KillService<E, R, T>
where
    E: Enumerator,
    R: ProcessResolver,
    T: Terminator,
{
    pub fn new(enumerator: E, resolver: R, terminator: T) -> Self {
        Self {
            enumerator,
            resolver,
            terminator,
            guard: CriticalGuard::default(),
        }
    }

    /// Replace the protected process names.
    pub fn with_critical_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.guard = CriticalGuard::new(names);
        self
    }

    pub fn guard(&self) -> &CriticalGuard {
        &self.guard
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Listening bindings for `(port, protocol)`, in enumeration order.
    async fn listening_on(
        &self,
        port: u16,
        protocol: Protocol,
        cancel: &CancellationToken,
    ) -> Result<Vec<PortBinding>> {
        let filter = Filter::new()
            .protocol(protocol)
            .port(port)
            .state(SocketState::Listen);
        let listed = self.enumerator.list(Some(&filter), cancel).await?;
        if listed.partial {
            debug!(port = port, warnings = ?listed.warnings, "partial enumeration during kill");
        }
        Ok(listed.data)
    }

    /// Enrich one binding; any failure other than cancellation is an identity failure.
    async fn identity_of(
        &self,
        binding: PortBinding,
        cancel: &CancellationToken,
    ) -> Result<Option<ProcessIdentity>> {
        let enriched = match self.resolver.enrich(vec![binding], cancel).await {
            Ok(b) => b,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => return Err(Error::IdentityUnavailable(e.to_string())),
        };
        Ok(enriched.into_iter().next().and_then(|b| b.process))
    }

    /// Terminate the process listening on `(port, protocol)`.
    pub async fn kill(
        &self,
        port: u16,
        protocol: Protocol,
        policy: SignalPolicy,
        cancel: &CancellationToken,
    ) -> Result<TerminateResult> {
        if port == 0 {
            return Err(Error::InvalidPort(0));
        }

        // IDENTIFY
        check_cancel(cancel)?;
        let Some(target) = self.listening_on(port, protocol, cancel).await?.into_iter().next()
        else {
            return Err(Error::NotFound { protocol, port });
        };
        let pid = target.pid;
        let original = self.identity_of(target, cancel).await?;
        debug!(pid = pid, port = port, protocol = %protocol, "identified target");

        let mut result = TerminateResult::new(pid, port, protocol, original.clone());

        // CHECK_CRITICAL
        if let Some(reason) = self.guard.check(pid, original.as_ref()) {
            if !policy.force_system {
                warn!(pid = pid, port = port, reason = %reason, "refusing to kill critical process");
                result.blocked = true;
                result.blocked_by = Some(reason);
                return Err(Error::CriticalProcess {
                    result: Box::new(result),
                });
            }
            warn!(pid = pid, reason = %reason, "critical process guard overridden");
        }
        if pid <= 0 {
            return Err(Error::IdentityUnavailable(format!(
                "owner of {} port {} is not visible",
                protocol, port
            )));
        }

        // DRY_RUN
        if policy.dry_run {
            info!(pid = pid, port = port, "dry run, no signal sent");
            result.dry_run = true;
            return Ok(result);
        }

        // REVALIDATE
        check_cancel(cancel)?;
        self.resolver.invalidate_pid(pid);
        let current = self.listening_on(port, protocol, cancel).await?;
        let Some(first) = current.first() else {
            info!(pid = pid, port = port, "target closed the port before revalidation");
            return Err(Error::ProcessExited { pid });
        };
        // Dual-stack listeners may report several rows; every one must still
        // belong to the identified PID.
        if let Some(other) = current.iter().find(|b| b.pid != pid) {
            warn!(pid = pid, new_pid = other.pid, port = port, "port owner changed");
            return Err(Error::OwnershipConflict(format!(
                "PID changed from {} to {}",
                pid, other.pid
            )));
        }
        let recheck = first.clone();

        if let Some(original) = original.as_ref().filter(|p| p.create_time_ms > 0) {
            let fresh = self
                .identity_of(recheck, cancel)
                .await?
                .filter(|p| p.create_time_ms > 0)
                .ok_or_else(|| {
                    Error::IdentityUnavailable(format!(
                        "cannot revalidate identity of PID {} before termination",
                        pid
                    ))
                })?;
            if !original.is_same_process(&fresh) {
                warn!(
                    pid = pid,
                    original_start = original.create_time_ms,
                    current_start = fresh.create_time_ms,
                    "PID reuse detected"
                );
                return Err(Error::OwnershipConflict("PID reuse detected".to_string()));
            }
        }

        // EXECUTE
        check_cancel(cancel)?;
        info!(pid = pid, port = port, force = policy.force, "terminating process");
        self.terminator.terminate(pid, policy, cancel).await?;

        result.killed = true;
        Ok(result)
    }
}
