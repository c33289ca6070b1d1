//! SOCKS5 method negotiation
//!
//! Parses the client greeting from whatever bytes have been buffered so far.
//! Only the "no authentication" method is ever selected.

use super::consts::*;
use super::types::Greeting;
use crate::error::Socks5Error;

/// Parse a buffered client greeting
///
/// # SOCKS5 Greeting Format
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
///
/// Returns `Ok(None)` while the greeting is still incomplete. A wrong version
/// byte or more bytes than `NMETHODS` declares is a protocol error.
pub fn parse_greeting(buf: &[u8]) -> Result<Option<Greeting>, Socks5Error> {
    match buf.first() {
        None => return Ok(None),
        Some(&version) if version != SOCKS5_VERSION => {
            return Err(Socks5Error::UnsupportedVersion(version))
        }
        Some(_) => {}
    }

    if buf.len() < GREETING_HEADER_LEN {
        return Ok(None);
    }

    let expected = GREETING_HEADER_LEN + buf[1] as usize;
    if buf.len() < expected {
        return Ok(None);
    }
    if buf.len() > expected {
        return Err(Socks5Error::MessageTooLong {
            expected,
            actual: buf.len(),
        });
    }

    let methods = &buf[GREETING_HEADER_LEN..expected];
    let method = if methods.contains(&SOCKS5_AUTH_METHOD_NONE) {
        SOCKS5_AUTH_METHOD_NONE
    } else {
        SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE
    };

    Ok(Some(Greeting { method }))
}

/// Reply sent when the greeting itself is malformed
pub fn rejection() -> [u8; 2] {
    [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE]
}
