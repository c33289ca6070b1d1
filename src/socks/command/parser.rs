//! SOCKS5 request parser
//!
//! Parses a CONNECT request out of the bytes buffered for a connection.

use crate::error::Socks5Error;
use crate::socks::consts::*;
use crate::socks::types::{ConnectRequest, TargetAddr};
use std::net::Ipv4Addr;

/// Parse a SOCKS5 request from a partially filled buffer
///
/// # SOCKS5 Request Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// Fields are checked as soon as they are present: a non-CONNECT command or an
/// unsupported address type is reported without waiting for the rest of the
/// message. Returns `Ok(None)` while more bytes are needed.
pub fn parse_request(buf: &[u8]) -> Result<Option<ConnectRequest>, Socks5Error> {
    let Some(&version) = buf.first() else {
        return Ok(None);
    };
    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }

    let Some(&command) = buf.get(1) else {
        return Ok(None);
    };
    if command != SOCKS5_CMD_TCP_CONNECT {
        return Err(Socks5Error::CommandNotSupported(command));
    }

    let Some(&addr_type) = buf.get(3) else {
        return Ok(None);
    };

    match addr_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            if !complete(buf, IPV4_REQUEST_LEN)? {
                return Ok(None);
            }
            let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
            let port = u16::from_be_bytes([buf[8], buf[9]]);
            Ok(Some(ConnectRequest {
                target: TargetAddr::Ipv4(ip),
                port,
            }))
        }

        SOCKS5_ADDR_TYPE_DOMAIN => {
            let Some(&domain_len) = buf.get(REQUEST_HEADER_LEN) else {
                return Ok(None);
            };
            let domain_len = domain_len as usize;
            if domain_len == 0 {
                return Err(Socks5Error::InvalidDomain(String::new()));
            }

            let start = REQUEST_HEADER_LEN + 1;
            let end = start + domain_len;
            if !complete(buf, end + 2)? {
                return Ok(None);
            }

            let raw = &buf[start..end];
            if !raw.is_ascii() {
                return Err(Socks5Error::InvalidDomain(
                    String::from_utf8_lossy(raw).into_owned(),
                ));
            }
            // ASCII is valid UTF-8
            let domain = String::from_utf8_lossy(raw).into_owned();
            let port = u16::from_be_bytes([buf[end], buf[end + 1]]);

            Ok(Some(ConnectRequest {
                target: TargetAddr::Domain(domain),
                port,
            }))
        }

        other => Err(Socks5Error::AddressTypeNotSupported(other)),
    }
}

/// Whether exactly `expected` bytes are buffered; extra bytes are an error
fn complete(buf: &[u8], expected: usize) -> Result<bool, Socks5Error> {
    if buf.len() > expected {
        return Err(Socks5Error::MessageTooLong {
            expected,
            actual: buf.len(),
        });
    }
    Ok(buf.len() == expected)
}
