//! Decoders for the IP helper owner-PID tables.
//!
//! Every table is `{ dwNumEntries: u32, table: [ROW; n] }` with rows starting
//! at offset 4. Fields are little-endian `u32`s except addresses, which are
//! stored in network order, and ports, whose first two bytes hold the port
//! in network order.
//!
//! ```text
//! MIB_TCPROW_OWNER_PID   (24)  0 state | 4 laddr | 8 lport | 12 raddr | 16 rport | 20 pid
//! MIB_UDPROW_OWNER_PID   (12)  0 laddr | 4 lport | 8 pid
//! MIB_TCP6ROW_OWNER_PID  (56)  0 laddr[16] | 16 lscope | 20 lport | 24 raddr[16]
//!                              40 rscope | 44 rport | 48 state | 52 pid
//! MIB_UDP6ROW_OWNER_PID  (28)  0 laddr[16] | 16 lscope | 20 lport | 24 pid
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::domain::{PortBinding, Protocol, SocketState};

pub(crate) const TCP4_ROW_LEN: usize = 24;
pub(crate) const UDP4_ROW_LEN: usize = 12;
pub(crate) const TCP6_ROW_LEN: usize = 56;
pub(crate) const UDP6_ROW_LEN: usize = 28;

fn read_u32(buf: &[u8], off: usize) -> Option<u32> {
    Some(u32::from_le_bytes(buf.get(off..off + 4)?.try_into().ok()?))
}

fn read_port(buf: &[u8], off: usize) -> Option<u16> {
    let b = buf.get(off..off + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

fn read_v4(buf: &[u8], off: usize) -> Option<IpAddr> {
    let octets: [u8; 4] = buf.get(off..off + 4)?.try_into().ok()?;
    Some(IpAddr::V4(Ipv4Addr::from(octets)))
}

fn read_v6(buf: &[u8], off: usize) -> Option<IpAddr> {
    let octets: [u8; 16] = buf.get(off..off + 16)?.try_into().ok()?;
    Some(IpAddr::V6(Ipv6Addr::from(octets)))
}

/// `MIB_TCP_STATE` to the normalized state.
fn map_tcp_state(code: u32) -> SocketState {
    match code {
        2 => SocketState::Listen,
        5 => SocketState::Established,
        8 => SocketState::CloseWait,
        11 => SocketState::TimeWait,
        _ => SocketState::Unknown,
    }
}

/// Iterate the rows of a table, clamped to what the buffer actually holds.
fn rows(buf: &[u8], row_len: usize) -> impl Iterator<Item = &[u8]> {
    let declared = read_u32(buf, 0).unwrap_or(0) as usize;
    let available = buf.len().saturating_sub(4) / row_len;
    buf.get(4..)
        .unwrap_or(&[])
        .chunks_exact(row_len)
        .take(declared.min(available))
}

fn decode_tcp4_row(row: &[u8]) -> Option<PortBinding> {
    let state = map_tcp_state(read_u32(row, 0)?);
    let binding = PortBinding::new(Protocol::Tcp, read_v4(row, 4)?, read_port(row, 8)?, state)
        .with_remote(read_v4(row, 12)?, read_port(row, 16)?)
        .with_pid(read_u32(row, 20)? as i32);
    Some(binding)
}

fn decode_udp4_row(row: &[u8]) -> Option<PortBinding> {
    let binding = PortBinding::new(
        Protocol::Udp,
        read_v4(row, 0)?,
        read_port(row, 4)?,
        SocketState::Listen,
    )
    .with_pid(read_u32(row, 8)? as i32);
    Some(binding)
}

fn decode_tcp6_row(row: &[u8]) -> Option<PortBinding> {
    let state = map_tcp_state(read_u32(row, 48)?);
    let binding = PortBinding::new(Protocol::Tcp, read_v6(row, 0)?, read_port(row, 20)?, state)
        .with_remote(read_v6(row, 24)?, read_port(row, 44)?)
        .with_pid(read_u32(row, 52)? as i32);
    Some(binding)
}

fn decode_udp6_row(row: &[u8]) -> Option<PortBinding> {
    let binding = PortBinding::new(
        Protocol::Udp,
        read_v6(row, 0)?,
        read_port(row, 20)?,
        SocketState::Listen,
    )
    .with_pid(read_u32(row, 24)? as i32);
    Some(binding)
}

pub(crate) fn decode_tcp4_table(buf: &[u8]) -> Vec<PortBinding> {
    rows(buf, TCP4_ROW_LEN).filter_map(decode_tcp4_row).collect()
}

pub(crate) fn decode_udp4_table(buf: &[u8]) -> Vec<PortBinding> {
    rows(buf, UDP4_ROW_LEN).filter_map(decode_udp4_row).collect()
}

pub(crate) fn decode_tcp6_table(buf: &[u8]) -> Vec<PortBinding> {
    rows(buf, TCP6_ROW_LEN).filter_map(decode_tcp6_row).collect()
}

pub(crate) fn decode_udp6_table(buf: &[u8]) -> Vec<PortBinding> {
    rows(buf, UDP6_ROW_LEN).filter_map(decode_udp6_row).collect()
}
