//! `/proc/net/{tcp,udp}{,6}` table reader.
//!
//! Format (space-delimited, hex-encoded):
//! ```text
//!   sl  local_address  rem_address  st  tx_queue:rx_queue  tr:tm->when  retrnsmt  uid  timeout  inode
//!    0: 0100007F:1F90 00000000:0000 0A 00000000:00000000  00:00000000  00000000  1000  0        12345
//! ```
//!
//! Addresses are printed as `%08X` words of the kernel's in-memory value, so
//! each 4-byte group comes back in host byte order.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use super::{map_state, Family, InodeRow};
use crate::domain::{PortBinding, Protocol};
use crate::error::{Error, Result};

fn table_path(root: &Path, protocol: Protocol, family: Family) -> PathBuf {
    let name = match (protocol, family) {
        (Protocol::Tcp, Family::V4) => "tcp",
        (Protocol::Tcp, Family::V6) => "tcp6",
        (Protocol::Udp, Family::V4) => "udp",
        (Protocol::Udp, Family::V6) => "udp6",
    };
    root.join("net").join(name)
}

/// Read and parse one table. A missing IPv6 table means IPv6 is disabled.
pub(super) fn read_table(root: &Path, protocol: Protocol, family: Family) -> Result<Vec<InodeRow>> {
    let path = table_path(root, protocol, family);
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(parse_table(&content, protocol)),
        Err(e) if family == Family::V6 && e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(Error::PermissionDenied(
            format!("{}: {}", path.display(), e),
        )),
        Err(e) => Err(Error::Io(e)),
    }
}

fn parse_table(content: &str, protocol: Protocol) -> Vec<InodeRow> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| parse_line(line, protocol))
        .collect()
}

fn parse_line(line: &str, protocol: Protocol) -> Option<InodeRow> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }

    let (local_ip, local_port) = parse_endpoint(fields[1])?;
    let (remote_ip, remote_port) = parse_endpoint(fields[2])?;
    let state = u8::from_str_radix(fields[3], 16).ok()?;
    let inode: u64 = fields[9].parse().ok()?;

    let binding = PortBinding::new(protocol, local_ip, local_port, map_state(protocol, state))
        .with_remote(remote_ip, remote_port);
    Some((binding, inode))
}

/// Parse `hex_addr:hex_port`.
fn parse_endpoint(s: &str) -> Option<(IpAddr, u16)> {
    let (addr, port) = s.rsplit_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    Some((parse_hex_ip(addr)?, port))
}

fn parse_hex_ip(hex: &str) -> Option<IpAddr> {
    match hex.len() {
        8 => {
            let word = u32::from_str_radix(hex, 16).ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes())))
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                let word = u32::from_str_radix(hex.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
