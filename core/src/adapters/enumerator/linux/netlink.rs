//! `SOCK_DIAG` netlink dump.
//!
//! Wire layout (host byte order unless noted):
//!
//! ```text
//! nlmsghdr        0  len u32 | 4 type u16 | 6 flags u16 | 8 seq u32 | 12 pid u32
//! inet_diag_req  16  family u8 | 17 protocol u8 | 18 ext u8 | 19 pad
//!                20  states u32 | 24..72 inet_diag_sockid (zeroed)
//! inet_diag_msg   0  family u8 | 1 state u8 | 4 sport be16 | 6 dport be16
//!                 8  src [16] | 24 dst [16] | 40 if u32 | 44 cookie [8]
//!                52  expires | 56 rqueue | 60 wqueue | 64 uid | 68 inode u32
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::socket::{
    recv, sendto, setsockopt, socket, sockopt, AddressFamily, MsgFlags, NetlinkAddr, SockFlag,
    SockProtocol, SockType,
};
use nix::sys::time::{TimeVal, TimeValLike};
use tokio_util::sync::CancellationToken;

use super::{map_state, Family, InodeRow};
use crate::domain::{PortBinding, Protocol};
use crate::error::{Error, Result};

const NLMSG_HDRLEN: usize = 16;
const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;
const SOCK_DIAG_BY_FAMILY: u16 = 20;
const NLM_F_REQUEST: u16 = 0x001;
const NLM_F_DUMP: u16 = 0x300;

const AF_INET: u8 = 2;
const AF_INET6: u8 = 10;

const REQUEST_LEN: usize = 72;
const DIAG_MSG_LEN: usize = 72;
const ALL_STATES: u32 = 0xFFFF_FFFF;

const RECV_BUFFER: usize = 32 * 1024;
const RECV_TIMEOUT_MS: i64 = 250;
const SILENCE_LIMIT: Duration = Duration::from_secs(5);

impl Family {
    fn af(self) -> u8 {
        match self {
            Family::V4 => AF_INET,
            Family::V6 => AF_INET6,
        }
    }
}

/// Build one `SOCK_DIAG_BY_FAMILY` dump request for every state.
fn encode_request(family: Family, protocol: Protocol, seq: u32) -> [u8; REQUEST_LEN] {
    let mut buf = [0u8; REQUEST_LEN];
    buf[0..4].copy_from_slice(&(REQUEST_LEN as u32).to_ne_bytes());
    buf[4..6].copy_from_slice(&SOCK_DIAG_BY_FAMILY.to_ne_bytes());
    buf[6..8].copy_from_slice(&(NLM_F_REQUEST | NLM_F_DUMP).to_ne_bytes());
    buf[8..12].copy_from_slice(&seq.to_ne_bytes());
    // pid 0: addressed to the kernel
    buf[16] = family.af();
    buf[17] = protocol.number();
    buf[20..24].copy_from_slice(&ALL_STATES.to_ne_bytes());
    buf
}

/// One netlink message inside a receive buffer.
#[derive(Debug, PartialEq)]
struct Message<'a> {
    kind: u16,
    seq: u32,
    payload: &'a [u8],
}

fn read_u16(buf: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_ne_bytes(buf.get(off..off + 2)?.try_into().ok()?))
}

fn read_u32(buf: &[u8], off: usize) -> Option<u32> {
    Some(u32::from_ne_bytes(buf.get(off..off + 4)?.try_into().ok()?))
}

/// Split a datagram into its 4-byte aligned messages.
fn split_messages(buf: &[u8]) -> Result<Vec<Message<'_>>> {
    let mut messages = Vec::new();
    let mut off = 0usize;

    while off + NLMSG_HDRLEN <= buf.len() {
        let invalid = || Error::ParseError(format!("truncated netlink header at offset {}", off));
        let len = read_u32(buf, off).ok_or_else(invalid)? as usize;
        let kind = read_u16(buf, off + 4).ok_or_else(invalid)?;
        let seq = read_u32(buf, off + 8).ok_or_else(invalid)?;

        if len < NLMSG_HDRLEN || off + len > buf.len() {
            return Err(Error::ParseError(format!(
                "netlink message length {} out of bounds at offset {}",
                len, off
            )));
        }

        messages.push(Message {
            kind,
            seq,
            payload: &buf[off + NLMSG_HDRLEN..off + len],
        });
        off += (len + 3) & !3;
    }

    Ok(messages)
}

/// Decode an `inet_diag_msg` payload into a binding plus its inode.
fn decode_diag_msg(payload: &[u8], protocol: Protocol) -> Option<InodeRow> {
    if payload.len() < DIAG_MSG_LEN {
        return None;
    }

    let family = payload[0];
    let state = map_state(protocol, payload[1]);
    let sport = u16::from_be_bytes([payload[4], payload[5]]);
    let dport = u16::from_be_bytes([payload[6], payload[7]]);
    let (src, dst) = match family {
        AF_INET => (decode_v4(&payload[8..12]), decode_v4(&payload[24..28])),
        AF_INET6 => (decode_v6(&payload[8..24]), decode_v6(&payload[24..40])),
        _ => return None,
    };
    let inode = read_u32(payload, 68)? as u64;

    let binding = PortBinding::new(protocol, src?, sport, state).with_remote(dst?, dport);
    Some((binding, inode))
}

fn decode_v4(b: &[u8]) -> Option<IpAddr> {
    let octets: [u8; 4] = b.try_into().ok()?;
    Some(IpAddr::V4(Ipv4Addr::from(octets)))
}

fn decode_v6(b: &[u8]) -> Option<IpAddr> {
    let octets: [u8; 16] = b.try_into().ok()?;
    Some(IpAddr::V6(Ipv6Addr::from(octets)))
}

fn errno_error(context: &str, errno: Errno) -> Error {
    match errno {
        Errno::EPERM | Errno::EACCES => Error::PermissionDenied(format!("{}: {}", context, errno)),
        other => Error::Io(std::io::Error::other(format!("{}: {}", context, other))),
    }
}

/// Dump every socket of one protocol and family.
///
/// Reads until `NLMSG_DONE`; a partial dump is reported as an error, never
/// returned as data.
pub(super) fn dump(
    protocol: Protocol,
    family: Family,
    cancel: &CancellationToken,
) -> Result<Vec<InodeRow>> {
    let fd = socket(
        AddressFamily::Netlink,
        SockType::Raw,
        SockFlag::SOCK_CLOEXEC,
        SockProtocol::NetlinkSockDiag,
    )
    .map_err(|e| errno_error("netlink socket", e))?;

    setsockopt(
        &fd,
        sockopt::ReceiveTimeout,
        &TimeVal::milliseconds(RECV_TIMEOUT_MS),
    )
    .map_err(|e| errno_error("netlink receive timeout", e))?;

    let seq = std::process::id();
    let request = encode_request(family, protocol, seq);
    let kernel = NetlinkAddr::new(0, 0);
    sendto(fd.as_raw_fd(), &request, &kernel, MsgFlags::empty())
        .map_err(|e| errno_error("netlink send", e))?;

    let mut rows = Vec::new();
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut last_data = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let n = match recv(fd.as_raw_fd(), &mut buf, MsgFlags::empty()) {
            Ok(0) => {
                return Err(Error::ParseError(
                    "netlink socket closed before NLMSG_DONE".to_string(),
                ))
            }
            Ok(n) => n,
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => {
                if last_data.elapsed() > SILENCE_LIMIT {
                    return Err(Error::Timeout(format!(
                        "no netlink response for {} {:?} within {:?}",
                        protocol, family, SILENCE_LIMIT
                    )));
                }
                continue;
            }
            Err(e) => return Err(errno_error("netlink recv", e)),
        };
        last_data = Instant::now();

        for msg in split_messages(&buf[..n])? {
            if msg.seq != seq {
                continue;
            }
            match msg.kind {
                NLMSG_DONE => return Ok(rows),
                NLMSG_ERROR => {
                    let code = read_u32(msg.payload, 0).map(|v| v as i32).unwrap_or(-1);
                    if code != 0 {
                        let err = std::io::Error::from_raw_os_error(-code);
                        return Err(match err.kind() {
                            std::io::ErrorKind::PermissionDenied => {
                                Error::PermissionDenied(format!("netlink dump: {}", err))
                            }
                            _ => Error::Io(err),
                        });
                    }
                }
                SOCK_DIAG_BY_FAMILY => {
                    if let Some(row) = decode_diag_msg(msg.payload, protocol) {
                        rows.push(row);
                    }
                }
                _ => {}
            }
        }
    }
}
