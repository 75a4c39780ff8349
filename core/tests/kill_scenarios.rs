//! Kill protocol scenarios against scripted in-memory collaborators.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use parking_lot::Mutex;
use porthog_core::ports::{Enumerator, ProcessResolver, Terminator};
use porthog_core::{
    Error, ErrorKind, Filter, KillService, PartialResult, PortBinding, ProcessIdentity, Protocol,
    Result, SignalPolicy, SocketState,
};
use tokio_util::sync::CancellationToken;

/// Returns one scripted socket table per `list` call; the last one repeats.
#[derive(Clone)]
struct ScriptedEnumerator {
    tables: Arc<Mutex<VecDeque<Vec<PortBinding>>>>,
    calls: Arc<Mutex<usize>>,
    cancel_after_first: Option<CancellationToken>,
}

impl ScriptedEnumerator {
    fn new(tables: Vec<Vec<PortBinding>>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(tables.into())),
            calls: Arc::new(Mutex::new(0)),
            cancel_after_first: None,
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

impl Enumerator for ScriptedEnumerator {
    async fn list(
        &self,
        filter: Option<&Filter>,
        cancel: &CancellationToken,
    ) -> Result<PartialResult<Vec<PortBinding>>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        *self.calls.lock() += 1;
        let table = {
            let mut tables = self.tables.lock();
            if tables.len() > 1 {
                tables.pop_front().unwrap_or_default()
            } else {
                tables.front().cloned().unwrap_or_default()
            }
        };
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }
        Ok(PartialResult::new(match filter {
            Some(f) => f.apply(table),
            None => table,
        }))
    }
}

/// Resolves identities from a script of `(name, create_time_ms)` per call.
#[derive(Clone)]
struct ScriptedResolver {
    answers: Arc<Mutex<VecDeque<Option<(&'static str, i64)>>>>,
    invalidated: Arc<Mutex<Vec<i32>>>,
}

impl ScriptedResolver {
    fn new(answers: Vec<Option<(&'static str, i64)>>) -> Self {
        Self {
            answers: Arc::new(Mutex::new(answers.into())),
            invalidated: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ProcessResolver for ScriptedResolver {
    async fn enrich(
        &self,
        mut bindings: Vec<PortBinding>,
        _cancel: &CancellationToken,
    ) -> Result<Vec<PortBinding>> {
        let answer = self.answers.lock().pop_front().flatten();
        for b in bindings.iter_mut() {
            b.process = answer
                .map(|(name, created)| ProcessIdentity::new(b.pid, name).with_create_time(created));
        }
        Ok(bindings)
    }

    fn invalidate_pid(&self, pid: i32) {
        self.invalidated.lock().push(pid);
    }
}

#[derive(Clone, Default)]
struct RecordingTerminator {
    calls: Arc<Mutex<Vec<(i32, SignalPolicy)>>>,
    outcome: Option<fn(i32) -> Error>,
}

impl Terminator for RecordingTerminator {
    async fn terminate(&self, pid: i32, policy: SignalPolicy, _cancel: &CancellationToken) -> Result<()> {
        self.calls.lock().push((pid, policy));
        match self.outcome {
            Some(make) => Err(make(pid)),
            None => Ok(()),
        }
    }
}

fn listener(port: u16, pid: i32) -> PortBinding {
    PortBinding::new(
        Protocol::Tcp,
        IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        port,
        SocketState::Listen,
    )
    .with_pid(pid)
}

#[tokio::test]
async fn test_same_process_is_killed() {
    let enumerator = ScriptedEnumerator::new(vec![vec![listener(3000, 100)]]);
    let resolver = ScriptedResolver::new(vec![Some(("node", 1_000)), Some(("node", 1_000))]);
    let terminator = RecordingTerminator::default();
    let service = KillService::new(enumerator.clone(), resolver.clone(), terminator.clone());

    let result = service
        .kill(3000, Protocol::Tcp, SignalPolicy::graceful(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.killed);
    assert!(!result.dry_run);
    assert_eq!(result.pid, 100);
    assert_eq!(result.process_name(), Some("node"));
    assert_eq!(enumerator.calls(), 2);
    assert_eq!(*resolver.invalidated.lock(), vec![100]);
    assert_eq!(terminator.calls.lock().len(), 1);
    assert_eq!(terminator.calls.lock()[0].0, 100);
}

#[tokio::test]
async fn test_critical_pid_is_blocked_without_second_enumeration() {
    let enumerator = ScriptedEnumerator::new(vec![vec![listener(445, 1)]]);
    let resolver = ScriptedResolver::new(vec![Some(("smbd", 10))]);
    let terminator = RecordingTerminator::default();
    let service = KillService::new(enumerator.clone(), resolver, terminator.clone());

    let err = service
        .kill(445, Protocol::Tcp, SignalPolicy::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CriticalProcess);
    let blocked = err.blocked_result().unwrap();
    assert!(blocked.blocked);
    assert!(!blocked.killed);
    assert!(blocked.blocked_by.is_some());
    assert_eq!(enumerator.calls(), 1);
    assert!(terminator.calls.lock().is_empty());
}

#[tokio::test]
async fn test_pid_change_between_phases_is_conflict() {
    let enumerator = ScriptedEnumerator::new(vec![vec![listener(8080, 100)], vec![listener(8080, 200)]]);
    let resolver = ScriptedResolver::new(vec![Some(("node", 1_000))]);
    let terminator = RecordingTerminator::default();
    let service = KillService::new(enumerator, resolver, terminator.clone());

    let err = service
        .kill(8080, Protocol::Tcp, SignalPolicy::graceful(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::OwnershipConflict);
    assert!(err.to_string().contains("PID changed from 100 to 200"));
    assert!(terminator.calls.lock().is_empty());
}

#[tokio::test]
async fn test_new_owner_alongside_original_is_conflict() {
    let enumerator = ScriptedEnumerator::new(vec![
        vec![listener(8080, 100)],
        vec![listener(8080, 200), listener(8080, 100)],
    ]);
    let resolver = ScriptedResolver::new(vec![Some(("node", 1_000)), Some(("node", 1_000))]);
    let terminator = RecordingTerminator::default();
    let service = KillService::new(enumerator.clone(), resolver, terminator.clone());

    let err = service
        .kill(8080, Protocol::Tcp, SignalPolicy::graceful(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::OwnershipConflict);
    assert!(err.to_string().contains("PID changed from 100 to 200"));
    assert_eq!(enumerator.calls(), 2);
    assert!(terminator.calls.lock().is_empty());
}

#[tokio::test]
async fn test_pid_reuse_is_conflict() {
    let enumerator = ScriptedEnumerator::new(vec![vec![listener(8080, 100)]]);
    let resolver = ScriptedResolver::new(vec![Some(("node", 1_000)), Some(("node", 2_000))]);
    let terminator = RecordingTerminator::default();
    let service = KillService::new(enumerator, resolver, terminator.clone());

    let err = service
        .kill(8080, Protocol::Tcp, SignalPolicy::graceful(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(&err, Error::OwnershipConflict(msg) if msg == "PID reuse detected"));
    assert!(terminator.calls.lock().is_empty());
}

#[tokio::test]
async fn test_exit_between_phases() {
    let enumerator = ScriptedEnumerator::new(vec![vec![listener(5000, 100)], vec![]]);
    let resolver = ScriptedResolver::new(vec![Some(("python3", 1_000))]);
    let terminator = RecordingTerminator::default();
    let service = KillService::new(enumerator, resolver, terminator.clone());

    let err = service
        .kill(5000, Protocol::Tcp, SignalPolicy::graceful(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ProcessExited { pid: 100 }));
    assert!(terminator.calls.lock().is_empty());
}

#[tokio::test]
async fn test_dry_run_stops_before_revalidation() {
    let enumerator = ScriptedEnumerator::new(vec![vec![listener(3000, 100)]]);
    let resolver = ScriptedResolver::new(vec![Some(("node", 1_000))]);
    let terminator = RecordingTerminator::default();
    let service = KillService::new(enumerator.clone(), resolver.clone(), terminator.clone());

    let result = service
        .kill(3000, Protocol::Tcp, SignalPolicy::dry_run(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.dry_run);
    assert!(!result.killed);
    assert_eq!(enumerator.calls(), 1);
    assert!(resolver.invalidated.lock().is_empty());
    assert!(terminator.calls.lock().is_empty());
}

#[tokio::test]
async fn test_unverifiable_identity_is_not_killed() {
    let enumerator = ScriptedEnumerator::new(vec![vec![listener(3000, 100)]]);
    let resolver = ScriptedResolver::new(vec![Some(("node", 1_000)), None]);
    let terminator = RecordingTerminator::default();
    let service = KillService::new(enumerator, resolver, terminator.clone());

    let err = service
        .kill(3000, Protocol::Tcp, SignalPolicy::graceful(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IdentityUnavailable);
    assert!(terminator.calls.lock().is_empty());
}

#[tokio::test]
async fn test_cancel_between_phases() {
    let cancel = CancellationToken::new();
    let mut enumerator = ScriptedEnumerator::new(vec![vec![listener(3000, 100)]]);
    enumerator.cancel_after_first = Some(cancel.clone());
    let resolver = ScriptedResolver::new(vec![Some(("node", 1_000))]);
    let terminator = RecordingTerminator::default();
    let service = KillService::new(enumerator.clone(), resolver, terminator.clone());

    let err = service
        .kill(3000, Protocol::Tcp, SignalPolicy::graceful(), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(enumerator.calls(), 1);
    assert!(terminator.calls.lock().is_empty());
}

#[tokio::test]
async fn test_terminator_failure_surfaces_unchanged() {
    let enumerator = ScriptedEnumerator::new(vec![vec![listener(3000, 100)]]);
    let resolver = ScriptedResolver::new(vec![Some(("node", 1_000)), Some(("node", 1_000))]);
    let terminator = RecordingTerminator {
        outcome: Some(|pid: i32| Error::PermissionDenied(format!("kill({})", pid))),
        ..RecordingTerminator::default()
    };
    let service = KillService::new(enumerator, resolver, terminator.clone());

    let err = service
        .kill(3000, Protocol::Tcp, SignalPolicy::forced(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(terminator.calls.lock().len(), 1);
    assert!(terminator.calls.lock()[0].1.force);
}
