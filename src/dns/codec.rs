//! DNS query codec
//!
//! Builds "resolve A record" queries and extracts the queried name and first
//! A record from responses. The binary format itself is handled by
//! `hickory-proto`.

use crate::error::DnsError;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use std::net::Ipv4Addr;

/// Largest datagram the resolver reads
pub const MAX_DATAGRAM_SIZE: usize = 512;

/// Decoded response: which name it answers and its first IPv4 address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    /// Queried name in canonical form
    pub name: String,
    /// First A record, if the response carried one
    pub addr: Option<Ipv4Addr>,
}

/// Normalize a host name for correlation: lowercase, no trailing root dot
pub fn canonical_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Serialize a recursive A query for `host`
pub fn encode_query(id: u16, host: &str) -> Result<Vec<u8>, DnsError> {
    let name = Name::from_ascii(host).map_err(|e| DnsError::Encode(e.to_string()))?;

    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    message.add_query(Query::query(name, RecordType::A));

    message
        .to_vec()
        .map_err(|e| DnsError::Encode(e.to_string()))
}

/// Parse a datagram into the name it answers and its first A record
///
/// CNAME and other record types in the answer section are skipped.
pub fn decode_response(datagram: &[u8]) -> Result<DnsAnswer, DnsError> {
    let message = Message::from_vec(datagram).map_err(|e| DnsError::Decode(e.to_string()))?;

    if message.message_type() != MessageType::Response {
        return Err(DnsError::NotAResponse);
    }
    let query = message.queries().first().ok_or(DnsError::NotAResponse)?;

    let addr = message.answers().iter().find_map(|record| match record.data() {
        Some(RData::A(a)) => Some(a.0),
        _ => None,
    });

    Ok(DnsAnswer {
        name: canonical_name(&query.name().to_ascii()),
        addr,
    })
}
