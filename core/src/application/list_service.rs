//! Listing use case: enumerate, enrich, sort.

use std::str::FromStr;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{Filter, PartialResult, PortBinding};
use crate::error::{Error, Result};
use crate::ports::{Enumerator, ProcessResolver};

/// Ordering applied to listed bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Port,
    Pid,
    Name,
    Protocol,
}

impl FromStr for SortField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "port" => Ok(SortField::Port),
            "pid" => Ok(SortField::Pid),
            "name" => Ok(SortField::Name),
            "proto" | "protocol" => Ok(SortField::Protocol),
            other => Err(Error::ParseError(format!("unknown sort field '{}'", other))),
        }
    }
}

/// Sort in place. Ties fall back to port, then protocol.
pub fn sort_bindings(bindings: &mut [PortBinding], field: SortField) {
    let by_port = |a: &PortBinding, b: &PortBinding| {
        a.local_port
            .cmp(&b.local_port)
            .then_with(|| a.protocol.number().cmp(&b.protocol.number()))
    };
    match field {
        SortField::Port => bindings.sort_by(by_port),
        SortField::Pid => bindings.sort_by(|a, b| a.pid.cmp(&b.pid).then_with(|| by_port(a, b))),
        SortField::Name => bindings.sort_by(|a, b| {
            let a_name = a.process_name().unwrap_or_default().to_lowercase();
            let b_name = b.process_name().unwrap_or_default().to_lowercase();
            a_name.cmp(&b_name).then_with(|| by_port(a, b))
        }),
        SortField::Protocol => bindings.sort_by(|a, b| {
            a.protocol
                .number()
                .cmp(&b.protocol.number())
                .then_with(|| a.local_port.cmp(&b.local_port))
        }),
    }
}

/// Application service for listing socket bindings with their owners.
pub struct ListService<E: Enumerator, R: ProcessResolver> {
    enumerator: E,
    resolver: R,
}

impl<E: Enumerator, R: ProcessResolver> ListService<E, R> {
    pub fn new(enumerator: E, resolver: R) -> Self {
        Self {
            enumerator,
            resolver,
        }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Enumerate bindings matching `filter` and attach process identities.
    ///
    /// Enrichment is best effort: a failed enrichment keeps the raw bindings
    /// and records a warning.
    pub async fn list(
        &self,
        filter: Option<&Filter>,
        sort: SortField,
        cancel: &CancellationToken,
    ) -> Result<PartialResult<Vec<PortBinding>>> {
        let listed = self.enumerator.list(filter, cancel).await?;
        let PartialResult {
            data,
            partial,
            denied_count,
            warnings,
        } = listed;

        let mut result = PartialResult::new(Vec::new());
        result.partial = partial;
        result.denied_count = denied_count;
        result.warnings = warnings;

        let raw = data.clone();
        let mut bindings = match self.resolver.enrich(data, cancel).await {
            Ok(enriched) => enriched,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!(error = %e, "process enrichment failed");
                result.warn(format!("process enrichment failed: {}", e));
                raw
            }
        };

        sort_bindings(&mut bindings, sort);
        debug!(count = bindings.len(), partial = result.partial, "listed bindings");
        result.data = bindings;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProcessIdentity, Protocol, SocketState};
    use parking_lot::RwLock;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    struct MockEnumerator {
        bindings: Arc<RwLock<Vec<PortBinding>>>,
    }

    impl Enumerator for MockEnumerator {
        async fn list(
            &self,
            filter: Option<&Filter>,
            _cancel: &CancellationToken,
        ) -> Result<PartialResult<Vec<PortBinding>>> {
            let data = self.bindings.read().clone();
            let mut result = PartialResult::new(match filter {
                Some(f) => f.apply(data),
                None => data,
            });
            result.record_denied(1);
            Ok(result)
        }
    }

    struct MockResolver {
        fail: bool,
    }

    impl ProcessResolver for MockResolver {
        async fn enrich(
            &self,
            mut bindings: Vec<PortBinding>,
            cancel: &CancellationToken,
        ) -> Result<Vec<PortBinding>> {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.fail {
                return Err(Error::CommandFailed("ps exited".to_string()));
            }
            for b in bindings.iter_mut() {
                let name = match b.pid {
                    10 => "zsh",
                    20 => "Apache",
                    _ => "node",
                };
                b.process = Some(ProcessIdentity::new(b.pid, name));
            }
            Ok(bindings)
        }

        fn invalidate_pid(&self, _pid: i32) {}
    }

    fn binding(protocol: Protocol, port: u16, pid: i32) -> PortBinding {
        PortBinding::new(protocol, IpAddr::V4(Ipv4Addr::LOCALHOST), port, SocketState::Listen)
            .with_pid(pid)
    }

    fn service(fail: bool) -> ListService<MockEnumerator, MockResolver> {
        let bindings = vec![
            binding(Protocol::Udp, 5353, 30),
            binding(Protocol::Tcp, 8080, 10),
            binding(Protocol::Tcp, 3000, 20),
        ];
        ListService::new(
            MockEnumerator {
                bindings: Arc::new(RwLock::new(bindings)),
            },
            MockResolver { fail },
        )
    }

    #[test]
    fn test_sort_field_parse() {
        assert_eq!("PORT".parse::<SortField>().unwrap(), SortField::Port);
        assert_eq!("proto".parse::<SortField>().unwrap(), SortField::Protocol);
        assert_eq!("name".parse::<SortField>().unwrap(), SortField::Name);
        assert!("size".parse::<SortField>().is_err());
    }

    #[tokio::test]
    async fn test_list_sorted_by_port() {
        let result = service(false)
            .list(None, SortField::Port, &CancellationToken::new())
            .await
            .unwrap();
        let ports: Vec<u16> = result.data.iter().map(|b| b.local_port).collect();
        assert_eq!(ports, vec![3000, 5353, 8080]);
        assert!(result.data.iter().all(|b| b.process.is_some()));
        assert!(result.partial);
        assert_eq!(result.denied_count, 1);
    }

    #[tokio::test]
    async fn test_list_sorted_by_name_case_insensitive() {
        let result = service(false)
            .list(None, SortField::Name, &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<&str> = result.data.iter().filter_map(|b| b.process_name()).collect();
        assert_eq!(names, vec!["Apache", "node", "zsh"]);
    }

    #[tokio::test]
    async fn test_list_sorted_by_protocol() {
        let result = service(false)
            .list(None, SortField::Protocol, &CancellationToken::new())
            .await
            .unwrap();
        let keys: Vec<(Protocol, u16)> =
            result.data.iter().map(|b| (b.protocol, b.local_port)).collect();
        assert_eq!(
            keys,
            vec![(Protocol::Tcp, 3000), (Protocol::Tcp, 8080), (Protocol::Udp, 5353)]
        );
    }

    #[tokio::test]
    async fn test_enrich_failure_becomes_warning() {
        let filter = Filter::new().protocol(Protocol::Tcp);
        let result = service(true)
            .list(Some(&filter), SortField::Pid, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[0].pid, 10);
        assert!(result.data.iter().all(|b| b.process.is_none()));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.partial);
    }

    #[tokio::test]
    async fn test_cancelled_enrich_aborts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = service(false)
            .list(None, SortField::Port, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
