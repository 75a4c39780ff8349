//! Parser for `lsof -F pcn` field output.
//!
//! Each line is one field, tagged by its first character:
//! ```text
//! p34805
//! cnode
//! f19
//! n[::1]:3000
//! f22
//! n127.0.0.1:3000->127.0.0.1:52144
//! ```
//! `p` and `c` apply to every following `n` until the next `p`.

use std::net::{IpAddr, Ipv4Addr};

use crate::domain::{PortBinding, ProcessIdentity, Protocol, SocketState};

/// Parse the field stream for one protocol.
pub(crate) fn parse_fields(output: &str, protocol: Protocol) -> Vec<PortBinding> {
    let mut bindings = Vec::new();
    let mut pid: i32 = 0;
    let mut command = String::new();

    for line in output.lines() {
        let Some(tag) = line.chars().next() else {
            continue;
        };
        let value = &line[tag.len_utf8()..];

        match tag {
            'p' => {
                pid = value.trim().parse().unwrap_or(0);
                command.clear();
            }
            'c' => {
                command = value.replace("\\x20", " ").replace("\\x2f", "/");
            }
            'n' => {
                let Some(binding) = parse_name(value, protocol) else {
                    continue;
                };
                let mut binding = binding.with_pid(pid);
                if pid > 0 && !command.is_empty() {
                    binding.process = Some(ProcessIdentity::new(pid, command.clone()));
                }
                bindings.push(binding);
            }
            _ => {}
        }
    }

    bindings
}

/// Parse `host:port[->host:port]`.
fn parse_name(name: &str, protocol: Protocol) -> Option<PortBinding> {
    match name.split_once("->") {
        Some((local, remote)) => {
            let (lip, lport) = parse_host_port(local)?;
            let (rip, rport) = parse_host_port(remote)?;
            Some(
                PortBinding::new(protocol, lip, lport, SocketState::Established)
                    .with_remote(rip, rport),
            )
        }
        None => {
            let (ip, port) = parse_host_port(name)?;
            Some(PortBinding::new(protocol, ip, port, SocketState::Listen))
        }
    }
}

/// Parse `127.0.0.1:80`, `[::1]:80`, `*:80` or `[fe80::1%lo0]:5353`.
fn parse_host_port(s: &str) -> Option<(IpAddr, u16)> {
    let (host, port) = s.trim().rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host == "*" {
        return Some((IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    let host = host.split('%').next().unwrap_or(host);
    Some((host.parse().ok()?, port))
}
