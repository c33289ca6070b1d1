//! SOCKS5 reply builder
//!
//! Constructs SOCKS5 reply messages.

use crate::error::Socks5ReplyCode;
use crate::socks::consts::*;
use std::net::SocketAddrV4;

/// Build a SOCKS5 reply
///
/// # SOCKS5 Reply Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   |    4     |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// The address type is always IPv4. `bound` carries the resolved target, or
/// `0.0.0.0` when no address is known.
pub fn build_reply(code: Socks5ReplyCode, bound: SocketAddrV4) -> [u8; REPLY_LEN] {
    let mut reply = [0u8; REPLY_LEN];
    reply[0] = SOCKS5_VERSION;
    reply[1] = code.into();
    reply[2] = SOCKS5_RESERVED;
    reply[3] = SOCKS5_ADDR_TYPE_IPV4;
    reply[4..8].copy_from_slice(&bound.ip().octets());
    reply[8..10].copy_from_slice(&bound.port().to_be_bytes());
    reply
}
