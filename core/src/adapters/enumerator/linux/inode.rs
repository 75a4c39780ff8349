//! Bulk socket inode to PID resolution.
//!
//! Scans every `/proc/<pid>/fd` directory once per enumeration pass and
//! records each descriptor whose link reads `socket:[<inode>]`.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Error, Result};

/// Outcome of one resolution pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InodeResolution {
    pub pids: HashMap<u64, i32>,
    /// Process fd tables skipped because access was denied.
    pub denied: usize,
}

/// Parse an fd link target of the form `socket:[12345]`.
fn parse_socket_link(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Map each requested inode to the PID holding it open.
///
/// Unreadable fd tables are skipped and counted, never treated as errors.
/// Stops as soon as every inode is resolved.
pub fn resolve_pids(
    proc_root: &Path,
    inodes: &HashSet<u64>,
    cancel: &CancellationToken,
) -> Result<InodeResolution> {
    resolve_with(proc_root, inodes, cancel, read_fd_links)
}

/// Link targets of every descriptor in one `fd` directory.
fn read_fd_links(fd_dir: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(std::fs::read_dir(fd_dir)?
        .flatten()
        .filter_map(|fd| std::fs::read_link(fd.path()).ok())
        .collect())
}

fn resolve_with<F>(
    proc_root: &Path,
    inodes: &HashSet<u64>,
    cancel: &CancellationToken,
    fd_links: F,
) -> Result<InodeResolution>
where
    F: Fn(&Path) -> io::Result<Vec<PathBuf>>,
{
    let mut resolution = InodeResolution::default();
    if inodes.is_empty() {
        return Ok(resolution);
    }

    let entries = std::fs::read_dir(proc_root)?;
    for entry in entries.flatten() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let file_name = entry.file_name();
        let Some(pid) = file_name.to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };

        let targets = match fd_links(&entry.path().join("fd")) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                trace!(pid = pid, "fd table not readable");
                resolution.denied += 1;
                continue;
            }
            // Process exited mid-scan.
            Err(_) => continue,
        };

        for target in targets {
            let Some(inode) = target.to_str().and_then(parse_socket_link) else {
                continue;
            };
            if inodes.contains(&inode) {
                resolution.pids.entry(inode).or_insert(pid);
            }
        }

        if resolution.pids.len() == inodes.len() {
            break;
        }
    }

    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::os::unix::fs::symlink;

    fn fake_proc(procs: &[(i32, Vec<&str>)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (pid, links) in procs {
            let fd_dir = dir.path().join(pid.to_string()).join("fd");
            std::fs::create_dir_all(&fd_dir).unwrap();
            for (n, link) in links.iter().enumerate() {
                symlink(link, fd_dir.join(n.to_string())).unwrap();
            }
        }
        std::fs::create_dir_all(dir.path().join("self")).unwrap();
        std::fs::write(dir.path().join("uptime"), "1.0 1.0").unwrap();
        dir
    }

    #[test]
    fn test_parse_socket_link() {
        assert_eq!(parse_socket_link("socket:[12345]"), Some(12345));
        assert_eq!(parse_socket_link("pipe:[12345]"), None);
        assert_eq!(parse_socket_link("socket:[abc]"), None);
        assert_eq!(parse_socket_link("/dev/null"), None);
    }

    #[test]
    fn test_resolve_batch() {
        let dir = fake_proc(&[
            (100, vec!["/dev/null", "socket:[1001]", "pipe:[7]"]),
            (200, vec!["socket:[2002]", "socket:[2003]"]),
            (300, vec!["socket:[9999]"]),
        ]);
        let wanted: HashSet<u64> = [1001, 2003, 4242].into_iter().collect();

        let res = resolve_pids(dir.path(), &wanted, &CancellationToken::new()).unwrap();
        assert_eq!(res.pids.get(&1001), Some(&100));
        assert_eq!(res.pids.get(&2003), Some(&200));
        assert_eq!(res.pids.get(&4242), None);
        assert_eq!(res.pids.len(), 2);
        assert_eq!(res.denied, 0);
    }

    #[test]
    fn test_empty_request_skips_scan() {
        let res = resolve_pids(
            Path::new("/nonexistent-proc-root"),
            &HashSet::new(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(res.pids.is_empty());
    }

    #[test]
    fn test_cancelled_scan() {
        let dir = fake_proc(&[(1, vec!["socket:[1]"])]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let wanted: HashSet<u64> = [1].into_iter().collect();
        assert!(matches!(
            resolve_pids(dir.path(), &wanted, &cancel),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_denied_fd_tables_are_counted() {
        let dir = fake_proc(&[
            (100, vec!["socket:[1001]"]),
            (200, vec!["socket:[2002]"]),
            (300, vec!["socket:[3003]"]),
        ]);
        let wanted: HashSet<u64> = [1001, 2002, 3003].into_iter().collect();
        let locked = dir.path().join("200").join("fd");

        let res = resolve_with(dir.path(), &wanted, &CancellationToken::new(), |fd_dir| {
            if fd_dir == locked.as_path() {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            } else {
                read_fd_links(fd_dir)
            }
        })
        .unwrap();

        assert_eq!(res.denied, 1);
        assert_eq!(res.pids.get(&1001), Some(&100));
        assert_eq!(res.pids.get(&2002), None);
        assert_eq!(res.pids.get(&3003), Some(&300));
    }

    #[test]
    fn test_stops_once_every_inode_is_resolved() {
        // A socket shared across fork: any holder resolves it.
        let dir = fake_proc(&[
            (100, vec!["socket:[77]"]),
            (200, vec!["socket:[77]"]),
            (300, vec!["socket:[77]"]),
        ]);
        let wanted: HashSet<u64> = [77].into_iter().collect();
        let visited = Cell::new(0);

        let res = resolve_with(dir.path(), &wanted, &CancellationToken::new(), |fd_dir| {
            visited.set(visited.get() + 1);
            read_fd_links(fd_dir)
        })
        .unwrap();

        assert_eq!(res.pids.len(), 1);
        assert_eq!(visited.get(), 1);
    }
}
