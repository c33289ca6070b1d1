//! DNS resolution for domain-name CONNECT targets
//!
//! [`codec`] turns names into A-record queries and responses back into
//! addresses; [`Resolver`] runs those queries over a single UDP socket on the
//! proxy's event loop, retrying lost datagrams.

pub mod codec;
mod resolver;

pub use codec::{canonical_name, decode_response, encode_query, DnsAnswer};
pub use resolver::{Resolution, Resolver};
