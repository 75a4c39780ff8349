//! Linux process metadata from `/proc/<pid>`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::unistd::{sysconf, SysconfVar, Uid, User};

use crate::domain::ProcessIdentity;
use crate::error::{Error, Result};

use super::ProcessSource;

/// Fallback when `sysconf(_SC_CLK_TCK)` is unavailable.
const DEFAULT_CLK_TCK: u64 = 100;

/// Reads `stat`, `status`, `exe` and `cmdline` below a proc root.
#[derive(Debug, Clone)]
pub struct LinuxProcessSource {
    proc_root: PathBuf,
}

impl LinuxProcessSource {
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl Default for LinuxProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a file, mapping "gone" to `None` and access refusal to `PermissionDenied`.
fn read_proc_file(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        // ESRCH surfaces when the process dies while the file is open.
        Err(e) if e.raw_os_error() == Some(nix::libc::ESRCH) => Ok(None),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            Err(Error::PermissionDenied(format!("{}: {}", path.display(), e)))
        }
        Err(e) => Err(Error::Io(e)),
    }
}

/// Parse `comm` and `starttime` (field 22, clock ticks since boot) from `/proc/<pid>/stat`.
///
/// `comm` may itself contain spaces and parentheses, so it spans from the
/// first `(` to the last `)`.
fn parse_stat(content: &str) -> Option<(String, u64)> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let comm = content.get(open + 1..close)?.to_string();
    let rest: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();
    // rest[0] is field 3 (state)
    let starttime = rest.get(22 - 3)?.parse().ok()?;
    Some((comm, starttime))
}

/// Boot time in Unix seconds from the `btime` line of `/proc/stat`.
fn parse_btime(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|l| l.strip_prefix("btime"))
        .and_then(|v| v.trim().parse().ok())
}

/// Real UID from the `Uid:` line of `/proc/<pid>/status`.
fn parse_uid(content: &str) -> Option<u32> {
    content
        .lines()
        .find_map(|l| l.strip_prefix("Uid:"))
        .and_then(|v| v.split_whitespace().next())
        .and_then(|v| v.parse().ok())
}

fn clk_tck() -> u64 {
    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(v)) if v > 0 => v as u64,
        _ => DEFAULT_CLK_TCK,
    }
}

fn user_name(uid: u32) -> String {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

fn read_identity(root: &Path, pid: i32) -> Result<Option<ProcessIdentity>> {
    let dir = root.join(pid.to_string());

    let Some(stat) = read_proc_file(&dir.join("stat"))? else {
        return Ok(None);
    };
    let (name, start_ticks) = parse_stat(&stat)
        .ok_or_else(|| Error::ParseError(format!("malformed {}/stat", dir.display())))?;

    let create_time_ms = read_proc_file(&root.join("stat"))?
        .as_deref()
        .and_then(parse_btime)
        .map(|btime| (btime * 1000 + start_ticks * 1000 / clk_tck()) as i64)
        .unwrap_or(0);

    // Other users' exe links are unreadable without CAP_SYS_PTRACE; keep the rest.
    let exe_path = std::fs::read_link(dir.join("exe"))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let username = read_proc_file(&dir.join("status"))?
        .as_deref()
        .and_then(parse_uid)
        .map(user_name)
        .unwrap_or_default();

    Ok(Some(
        ProcessIdentity::new(pid, name)
            .with_create_time(create_time_ms)
            .with_exe_path(exe_path)
            .with_username(username),
    ))
}

fn read_cmdline(root: &Path, pid: i32) -> Result<Option<String>> {
    let path = root.join(pid.to_string()).join("cmdline");
    let raw = match std::fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Err(Error::PermissionDenied(format!("{}: {}", path.display(), e)))
        }
        Err(e) => return Err(Error::Io(e)),
    };

    let args: Vec<String> = raw
        .split(|b| *b == 0)
        .filter(|a| !a.is_empty())
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect();
    // Kernel threads have an empty command line.
    Ok((!args.is_empty()).then(|| args.join(" ")))
}

impl ProcessSource for LinuxProcessSource {
    async fn identify(&self, pid: i32) -> Result<Option<ProcessIdentity>> {
        let root = self.proc_root.clone();
        tokio::task::spawn_blocking(move || read_identity(&root, pid))
            .await
            .map_err(|e| Error::CommandFailed(format!("process lookup task failed: {}", e)))?
    }

    async fn cmdline(&self, pid: i32) -> Result<Option<String>> {
        let root = self.proc_root.clone();
        tokio::task::spawn_blocking(move || read_cmdline(&root, pid))
            .await
            .map_err(|e| Error::CommandFailed(format!("cmdline task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "4242 (my (weird) proc) S 1 4242 4242 0 -1 4194560 100 0 0 0 5 3 0 0 20 0 1 0 123456 1000000 100 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 2 0 0 0 0 0";

    fn fake_proc() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stat"), "cpu  1 2 3\nbtime 1700000000\nprocesses 5\n").unwrap();
        let pid_dir = dir.path().join("4242");
        std::fs::create_dir(&pid_dir).unwrap();
        std::fs::write(pid_dir.join("stat"), STAT).unwrap();
        std::fs::write(
            pid_dir.join("status"),
            "Name:\tweird\nUmask:\t0022\nState:\tS (sleeping)\nUid:\t0\t0\t0\t0\nGid:\t0\t0\t0\t0\n",
        )
        .unwrap();
        std::fs::write(pid_dir.join("cmdline"), b"/usr/bin/weird\0--port\08080\0").unwrap();
        dir
    }

    #[test]
    fn test_parse_stat_handles_parens_in_comm() {
        let (comm, start) = parse_stat(STAT).unwrap();
        assert_eq!(comm, "my (weird) proc");
        assert_eq!(start, 123456);
        assert!(parse_stat("garbage").is_none());
    }

    #[test]
    fn test_parse_status_and_btime() {
        assert_eq!(parse_uid("Name:\tx\nUid:\t1000\t1000\t1000\t1000\n"), Some(1000));
        assert_eq!(parse_btime("cpu 1\nbtime 1700000000\n"), Some(1_700_000_000));
        assert_eq!(parse_btime("cpu 1\n"), None);
    }

    #[test]
    fn test_read_identity_from_fake_root() {
        let dir = fake_proc();
        let id = read_identity(dir.path(), 4242).unwrap().unwrap();

        assert_eq!(id.pid, 4242);
        assert_eq!(id.name, "my (weird) proc");
        assert_eq!(id.username, "root");
        let expected = 1_700_000_000_000 + 123456 * 1000 / clk_tck() as i64;
        assert_eq!(id.create_time_ms, expected);
        assert!(id.exe_path.is_empty());
        assert!(!id.permission_denied);
    }

    #[test]
    fn test_vanished_process_is_none() {
        let dir = fake_proc();
        assert!(read_identity(dir.path(), 999).unwrap().is_none());
        assert!(read_cmdline(dir.path(), 999).unwrap().is_none());
    }

    #[test]
    fn test_read_cmdline_joins_args() {
        let dir = fake_proc();
        assert_eq!(
            read_cmdline(dir.path(), 4242).unwrap().as_deref(),
            Some("/usr/bin/weird --port 8080")
        );
    }

    #[tokio::test]
    async fn test_identify_self() {
        let source = LinuxProcessSource::new();
        let pid = std::process::id() as i32;

        let id = source.identify(pid).await.unwrap().unwrap();
        assert_eq!(id.pid, pid);
        assert!(!id.name.is_empty());
        assert!(id.create_time_ms > 0);

        let again = source.identify(pid).await.unwrap().unwrap();
        assert!(id.is_same_process(&again));
    }
}
