//! SOCKS5 wire codec
//!
//! Pure encode/decode helpers for the subset of SOCKS5 the proxy speaks:
//! no-auth negotiation, CONNECT to IPv4 or domain targets, and IPv4 replies.
//! Every parser works on a partially filled buffer and reports "need more
//! data" as `Ok(None)`.

mod command;
mod consts;
mod greeting;
mod types;

pub use command::{build_reply, parse_request};
pub use consts::*;
pub use greeting::{parse_greeting, rejection};
pub use types::{ConnectRequest, Greeting, TargetAddr};
