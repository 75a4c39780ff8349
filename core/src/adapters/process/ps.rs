//! Parser for `ps -o user=,lstart=,comm=` output.

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::domain::ProcessIdentity;

/// `lstart` is always five tokens: `Mon Oct 14 10:22:33 2026`.
const LSTART_TOKENS: usize = 5;
const LSTART_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Parse an `lstart` timestamp in local time to Unix milliseconds.
fn parse_lstart(lstart: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(lstart, LSTART_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

/// Parse one `user lstart comm` line into an identity for `pid`.
pub(crate) fn parse_identity(pid: i32, line: &str) -> Option<ProcessIdentity> {
    let mut tokens = line.split_whitespace();
    let user = tokens.next()?;
    let lstart: Vec<&str> = tokens.by_ref().take(LSTART_TOKENS).collect();
    if lstart.len() != LSTART_TOKENS {
        return None;
    }
    let comm = tokens.collect::<Vec<_>>().join(" ");
    if comm.is_empty() {
        return None;
    }

    let name = comm.rsplit('/').next().unwrap_or(&comm).to_string();
    let exe_path = if comm.starts_with('/') { comm.clone() } else { String::new() };

    Some(
        ProcessIdentity::new(pid, name)
            .with_create_time(parse_lstart(&lstart.join(" ")).unwrap_or(0))
            .with_exe_path(exe_path)
            .with_username(user),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identity_line() {
        let id = parse_identity(501, "alice  Mon Oct  5 10:22:33 2026 /usr/local/bin/node").unwrap();
        assert_eq!(id.pid, 501);
        assert_eq!(id.username, "alice");
        assert_eq!(id.name, "node");
        assert_eq!(id.exe_path, "/usr/local/bin/node");

        let naive = NaiveDateTime::parse_from_str("2026-10-05 10:22:33", "%Y-%m-%d %H:%M:%S").unwrap();
        let expected = Local.from_local_datetime(&naive).earliest().unwrap().timestamp_millis();
        assert_eq!(id.create_time_ms, expected);
    }

    #[test]
    fn test_parse_identity_relative_comm() {
        let id = parse_identity(7, "_mdnsresponder Tue Sep 29 08:00:00 2026 mDNSResponder").unwrap();
        assert_eq!(id.name, "mDNSResponder");
        assert!(id.exe_path.is_empty());
        assert!(id.create_time_ms > 0);
    }

    #[test]
    fn test_parse_identity_rejects_short_line() {
        assert!(parse_identity(1, "root Mon Oct").is_none());
        assert!(parse_identity(1, "").is_none());
    }
}
