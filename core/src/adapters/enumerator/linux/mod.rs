//! Linux enumerator: netlink first, procfs tables as the fallback.
//!
//! Neither source reports the owning PID. Every row carries the socket inode,
//! and all inodes of one pass are resolved in a single `/proc/<pid>/fd` scan.

pub mod inode;
mod netlink;
mod procfs;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{Filter, PortBinding, Protocol, SocketState, UNRESOLVED_PID};
use crate::error::{Error, Result};

use self::inode::InodeResolution;
use super::{Backend, Scan};

/// Address family of one table dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

/// A socket row before its owner is known.
type InodeRow = (PortBinding, u64);

/// Map a kernel `tcp_states` number to the normalized state.
///
/// Netlink and procfs both report these same numbers, so one mapping
/// serves both paths.
fn map_state(protocol: Protocol, code: u8) -> SocketState {
    match protocol {
        Protocol::Tcp => match code {
            0x0A => SocketState::Listen,
            0x01 => SocketState::Established,
            0x06 => SocketState::TimeWait,
            0x08 => SocketState::CloseWait,
            _ => SocketState::Unknown,
        },
        // A bound, unconnected UDP socket sits in TCP_CLOSE (7).
        Protocol::Udp => match code {
            0x07 => SocketState::Listen,
            0x01 => SocketState::Established,
            _ => SocketState::Unknown,
        },
    }
}

/// Linux-specific enumerator backend.
pub struct LinuxBackend {
    proc_root: PathBuf,
}

impl LinuxBackend {
    pub fn new() -> Self {
        Self::with_proc_root(PathBuf::from("/proc"))
    }

    pub fn with_proc_root(proc_root: PathBuf) -> Self {
        Self { proc_root }
    }
}

impl Default for LinuxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for LinuxBackend {
    async fn scan(
        &self,
        protocols: &[Protocol],
        sockets: &Filter,
        cancel: &CancellationToken,
    ) -> Result<Scan> {
        let root = self.proc_root.clone();
        let protocols = protocols.to_vec();
        let sockets = sockets.clone();
        let token = cancel.clone();

        tokio::task::spawn_blocking(move || {
            scan_blocking(&root, &protocols, &sockets, &token, netlink::dump)
        })
        .await
        .map_err(|e| Error::CommandFailed(format!("enumeration task failed: {}", e)))?
    }
}

/// One kernel socket-table dump.
type DumpFn = fn(Protocol, Family, &CancellationToken) -> Result<Vec<InodeRow>>;

fn scan_blocking(
    root: &Path,
    protocols: &[Protocol],
    sockets: &Filter,
    cancel: &CancellationToken,
    dump: DumpFn,
) -> Result<Scan> {
    let mut scan = Scan::default();
    let mut rows: Vec<InodeRow> = Vec::new();

    for &protocol in protocols {
        for family in [Family::V4, Family::V6] {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match dump(protocol, family, cancel) {
                Ok(dumped) => rows.extend(dumped),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    debug!(
                        protocol = %protocol,
                        family = ?family,
                        error = %e,
                        "netlink dump failed, falling back to procfs"
                    );
                    match procfs::read_table(root, protocol, family) {
                        Ok(read) => rows.extend(read),
                        Err(e) => {
                            warn!(protocol = %protocol, family = ?family, error = %e, "socket table unavailable");
                            scan.warnings.push(format!("{} ({:?}): {}", protocol, family, e));
                        }
                    }
                }
            }
        }
    }

    // Owners are only looked up for rows that can still pass the filter.
    rows.retain(|(binding, _)| sockets.matches(binding));

    let inodes: HashSet<u64> = rows.iter().map(|(_, ino)| *ino).filter(|ino| *ino != 0).collect();
    let resolution = inode::resolve_pids(root, &inodes, cancel)?;
    attach_owners(&mut scan, rows, &inodes, &resolution);
    Ok(scan)
}

/// Fill in owner PIDs. Sockets without a visible owner get [`UNRESOLVED_PID`].
fn attach_owners(
    scan: &mut Scan,
    rows: Vec<InodeRow>,
    inodes: &HashSet<u64>,
    resolution: &InodeResolution,
) {
    let unresolved = inodes
        .iter()
        .filter(|ino| !resolution.pids.contains_key(ino))
        .count();
    if resolution.denied > 0 && unresolved > 0 {
        scan.denied = resolution.denied;
        scan.warnings.push(format!(
            "{} process fd tables unreadable; {} sockets have no known owner",
            resolution.denied, unresolved
        ));
    }

    scan.bindings = rows
        .into_iter()
        .map(|(binding, ino)| {
            let pid = resolution.pids.get(&ino).copied().unwrap_or(UNRESOLVED_PID);
            binding.with_pid(pid)
        })
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_state_mapping() {
        assert_eq!(map_state(Protocol::Tcp, 0x0A), SocketState::Listen);
        assert_eq!(map_state(Protocol::Tcp, 0x01), SocketState::Established);
        assert_eq!(map_state(Protocol::Tcp, 0x06), SocketState::TimeWait);
        assert_eq!(map_state(Protocol::Tcp, 0x08), SocketState::CloseWait);
        // SYN_SENT and TCP_CLOSE are not silently treated as listening.
        assert_eq!(map_state(Protocol::Tcp, 0x02), SocketState::Unknown);
        assert_eq!(map_state(Protocol::Tcp, 0x07), SocketState::Unknown);
    }

    #[test]
    fn test_udp_state_mapping() {
        assert_eq!(map_state(Protocol::Udp, 0x07), SocketState::Listen);
        assert_eq!(map_state(Protocol::Udp, 0x01), SocketState::Established);
        assert_eq!(map_state(Protocol::Udp, 0x0A), SocketState::Unknown);
    }

    #[test]
    fn test_scan_reads_live_tables() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let cancel = CancellationToken::new();

        let scan = scan_blocking(
            Path::new("/proc"),
            &[Protocol::Tcp],
            &Filter::new(),
            &cancel,
            netlink::dump,
        )
        .unwrap();
        let ours: Vec<_> = scan
            .bindings
            .iter()
            .filter(|b| b.local_port == port && b.is_listening())
            .collect();
        assert_eq!(ours.len(), 1);
        assert_eq!(ours[0].pid, std::process::id() as i32);
    }

    #[test]
    fn test_scan_honours_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = scan_blocking(
            Path::new("/proc"),
            &[Protocol::Tcp],
            &Filter::new(),
            &cancel,
            netlink::dump,
        );
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    const TCP_TABLE: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 41235 1 0000000000000000 100 0 0 10 0
   1: 00000000:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 15012 1 0000000000000000 100 0 0 10 0
";

    fn netlink_unavailable(_: Protocol, _: Family, _: &CancellationToken) -> Result<Vec<InodeRow>> {
        Err(Error::CommandFailed("netlink socket: EPROTONOSUPPORT".to_string()))
    }

    /// A proc root with a `net/tcp` table and one process holding inode 41235.
    fn fake_proc(with_table: bool) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("net")).unwrap();
        if with_table {
            std::fs::write(dir.path().join("net").join("tcp"), TCP_TABLE).unwrap();
        }
        let fd_dir = dir.path().join("4321").join("fd");
        std::fs::create_dir_all(&fd_dir).unwrap();
        std::os::unix::fs::symlink("socket:[41235]", fd_dir.join("3")).unwrap();
        dir
    }

    #[test]
    fn test_failed_dump_falls_back_to_procfs() {
        let dir = fake_proc(true);
        let scan = scan_blocking(
            dir.path(),
            &[Protocol::Tcp],
            &Filter::new(),
            &CancellationToken::new(),
            netlink_unavailable,
        )
        .unwrap();

        assert!(scan.warnings.is_empty());
        assert_eq!(scan.bindings.len(), 2);
        let web = scan.bindings.iter().find(|b| b.local_port == 8080).unwrap();
        assert_eq!(web.pid, 4321);
        let ssh = scan.bindings.iter().find(|b| b.local_port == 22).unwrap();
        assert_eq!(ssh.pid, UNRESOLVED_PID);
        assert!(!ssh.has_owner());
    }

    #[test]
    fn test_unreadable_table_is_partial() {
        let dir = fake_proc(false);
        let scan = scan_blocking(
            dir.path(),
            &[Protocol::Tcp],
            &Filter::new(),
            &CancellationToken::new(),
            netlink_unavailable,
        )
        .unwrap();

        // The missing v6 table is not an error, the missing v4 table is.
        assert_eq!(scan.warnings.len(), 1);
        assert!(scan.warnings[0].starts_with("tcp (V4)"));
        assert!(scan.bindings.is_empty());

        let result = scan.into_result(None);
        assert!(result.partial);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_rows_filtered_before_owner_lookup() {
        let dir = fake_proc(true);
        let sockets = Filter::new().port(22);
        let scan = scan_blocking(
            dir.path(),
            &[Protocol::Tcp],
            &sockets,
            &CancellationToken::new(),
            netlink_unavailable,
        )
        .unwrap();

        assert_eq!(scan.bindings.len(), 1);
        assert_eq!(scan.bindings[0].local_port, 22);
    }

    #[test]
    fn test_denied_fd_tables_are_reported() {
        let listen = |port| {
            PortBinding::new(
                Protocol::Tcp,
                std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                port,
                SocketState::Listen,
            )
        };
        let rows = vec![(listen(80), 11), (listen(443), 22)];
        let inodes: HashSet<u64> = [11, 22].into_iter().collect();
        let resolution = InodeResolution {
            pids: [(11, 500)].into_iter().collect(),
            denied: 3,
        };

        let mut scan = Scan::default();
        attach_owners(&mut scan, rows, &inodes, &resolution);
        assert_eq!(scan.denied, 3);
        assert_eq!(
            scan.warnings,
            vec!["3 process fd tables unreadable; 1 sockets have no known owner".to_string()]
        );
        assert_eq!(scan.bindings[0].pid, 500);
        assert_eq!(scan.bindings[1].pid, UNRESOLVED_PID);

        let result = scan.into_result(None);
        assert!(result.partial);
        assert_eq!(result.denied_count, 3);
    }

    #[test]
    fn test_denials_without_missing_owners_are_ignored() {
        let row = PortBinding::new(
            Protocol::Udp,
            std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            5353,
            SocketState::Listen,
        );
        let inodes: HashSet<u64> = [7].into_iter().collect();
        let resolution = InodeResolution {
            pids: [(7, 90)].into_iter().collect(),
            denied: 2,
        };

        let mut scan = Scan::default();
        attach_owners(&mut scan, vec![(row, 7)], &inodes, &resolution);
        assert_eq!(scan.denied, 0);
        assert!(scan.warnings.is_empty());
        assert_eq!(scan.bindings[0].pid, 90);
    }
}
