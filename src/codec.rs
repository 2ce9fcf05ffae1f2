//! Wire Codec (C1): parse/serialize DNS messages and the targeted accessors
//! the dispatcher needs without paying for a full re-serialize on every
//! lookup.
//!
//! Built directly on `hickory-proto`'s `op::Message`, the same wire codec the
//! teacher crate (`hickory-dns`) depends on. Unknown RR types are already
//! skipped correctly by `hickory-proto`'s own RDATA accounting during
//! parsing, so `answer_ips` only needs to filter the already-decoded answer
//! section.

use std::net::IpAddr;

use hickory_proto::op::{Header, Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{Name, RData, Record, RecordType};

use crate::error::CodecError;

/// Parse raw wire bytes into a `Message`. Malformed input is non-fatal to the
/// caller (spec.md §4.1) — it is always wrapped in `CodecError` for the
/// caller to discard the reply rather than propagate the failure.
pub fn parse(bytes: &[u8]) -> Result<Message, CodecError> {
    if bytes.len() < 12 {
        return Err(CodecError::Truncated);
    }
    Ok(Message::from_vec(bytes)?)
}

/// Serialize a `Message` back to wire bytes.
pub fn serialize(message: &Message) -> Result<Vec<u8>, CodecError> {
    message.to_vec().map_err(CodecError::Serialize)
}

/// The question name of the first query, lower-cased, if present.
pub fn question_name(message: &Message) -> Option<Name> {
    message.queries().first().map(|q| q.name().clone())
}

/// Every A/AAAA answer IP in the message, in answer-section order. RRs of any
/// other type (CNAME, MX, TXT, ...) are silently skipped — `hickory-proto`
/// has already consumed their RDATA correctly during `parse`, so no manual
/// RDLENGTH walk is needed here.
pub fn answer_ips(message: &Message) -> Vec<IpAddr> {
    message
        .answers()
        .iter()
        .filter_map(record_ip)
        .collect()
}

fn record_ip(record: &Record) -> Option<IpAddr> {
    match record.data() {
        Some(RData::A(a)) => Some(IpAddr::V4(a.0)),
        Some(RData::AAAA(a)) => Some(IpAddr::V6(a.0)),
        _ => None,
    }
}

/// Overwrite the transaction ID in an already-serialized message, in place,
/// without a full parse/re-serialize round trip. The ID lives in the first
/// two bytes of every DNS message per RFC 1035.
pub fn set_id(bytes: &mut [u8], id: u16) {
    if bytes.len() >= 2 {
        let [hi, lo] = id.to_be_bytes();
        bytes[0] = hi;
        bytes[1] = lo;
    }
}

/// Peek the transaction ID of a wire message without a full parse.
pub fn transaction_id(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Whether the TC (truncated) bit is set in a wire message's header.
pub fn is_truncated(bytes: &[u8]) -> bool {
    // Byte 2 is flags-high: bits are QR(1) Opcode(4) AA(1) TC(1) RD(1).
    bytes.len() > 2 && bytes[2] & 0b0000_0010 != 0
}

/// Truncate a UDP read to `max` bytes and, if anything was cut, set TC=1 in
/// the header so the rest of the pipeline treats it exactly like a wire-level
/// truncated reply (spec.md §4.3 boundary behavior).
pub fn truncate_to(bytes: &mut Vec<u8>, max: usize) {
    if bytes.len() > max {
        bytes.truncate(max);
        if bytes.len() > 2 {
            bytes[2] |= 0b0000_0010;
        }
    }
}

/// Build a policy reply (NXDOMAIN) for a blacklisted domain, echoing the
/// original question and transaction id (spec.md §7 category (e)).
pub fn nxdomain_reply(request: &Message) -> Result<Vec<u8>, CodecError> {
    synthesize(request, ResponseCode::NXDomain)
}

/// Build a SERVFAIL reply for deadline exhaustion or an empty pool
/// (spec.md §7 category (d)/(f)).
pub fn servfail_reply(request: &Message) -> Result<Vec<u8>, CodecError> {
    synthesize(request, ResponseCode::ServFail)
}

fn synthesize(request: &Message, rcode: ResponseCode) -> Result<Vec<u8>, CodecError> {
    let mut header = Header::response_from_request(request.header());
    header.set_message_type(MessageType::Response);
    header.set_op_code(OpCode::Query);
    header.set_authoritative(false);
    header.set_recursion_available(true);
    header.set_response_code(rcode);

    let mut reply = Message::new();
    reply.set_header(header);
    for query in request.queries() {
        reply.add_query(query.clone());
    }
    serialize(&reply)
}

/// True if the first question asks for an A or AAAA record. Used by the
/// dispatcher to gate the Untrusted pool's "all answer IPs in China CIDR"
/// acceptance rule (spec.md §4.5) to address lookups only — that pool's
/// trust model is entirely IP-geography-based and has nothing to say about
/// a CNAME/MX/TXT/... answer with no address records in it.
pub fn is_address_query(message: &Message) -> bool {
    message
        .queries()
        .first()
        .map(|q| matches!(q.query_type(), RecordType::A | RecordType::AAAA))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{Message, MessageType, OpCode, Query};
    use hickory_proto::rr::rdata::{A, AAAA};
    use hickory_proto::rr::{DNSClass, Name};
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::str::FromStr;

    fn sample_query() -> Message {
        let mut msg = Message::new();
        msg.set_id(0x1234);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        let mut q = Query::new();
        q.set_name(Name::from_str("example.com.").unwrap());
        q.set_query_class(DNSClass::IN);
        q.set_query_type(RecordType::A);
        msg.add_query(q);
        msg
    }

    #[test]
    fn round_trip_preserves_id_and_question() {
        let msg = sample_query();
        let bytes = serialize(&msg).unwrap();
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.id(), 0x1234);
        assert_eq!(
            question_name(&parsed).unwrap(),
            Name::from_str("example.com.").unwrap()
        );
    }

    #[test]
    fn answer_ips_extracts_a_and_aaaa_and_skips_others() {
        let mut msg = sample_query();
        let name = Name::from_str("example.com.").unwrap();
        msg.add_answer(Record::from_rdata(
            name.clone(),
            60,
            RData::A(A(Ipv4Addr::new(93, 184, 216, 34))),
        ));
        msg.add_answer(Record::from_rdata(
            name.clone(),
            60,
            RData::CNAME(hickory_proto::rr::rdata::CNAME(
                Name::from_str("alias.example.com.").unwrap(),
            )),
        ));
        msg.add_answer(Record::from_rdata(
            name,
            60,
            RData::AAAA(AAAA(Ipv6Addr::LOCALHOST)),
        ));

        let ips = answer_ips(&msg);
        assert_eq!(ips.len(), 2);
        assert_eq!(ips[0], IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)));
        assert_eq!(ips[1], IpAddr::V6(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn set_id_overwrites_first_two_bytes() {
        let msg = sample_query();
        let mut bytes = serialize(&msg).unwrap();
        set_id(&mut bytes, 0xBEEF);
        assert_eq!(transaction_id(&bytes), Some(0xBEEF));
    }

    #[test]
    fn truncate_to_sets_tc_bit() {
        let mut msg = sample_query();
        let name = Name::from_str("example.com.").unwrap();
        for i in 0..20u8 {
            msg.add_answer(Record::from_rdata(
                name.clone(),
                60,
                RData::A(A(Ipv4Addr::new(1, 1, 1, i))),
            ));
        }
        let mut bytes = serialize(&msg).unwrap();
        assert!(!is_truncated(&bytes));
        truncate_to(&mut bytes, 20);
        assert!(is_truncated(&bytes));
        assert_eq!(bytes.len(), 20);
    }

    #[test]
    fn nxdomain_reply_echoes_question_and_id() {
        let query = sample_query();
        let bytes = nxdomain_reply(&query).unwrap();
        let reply = parse(&bytes).unwrap();
        assert_eq!(reply.id(), 0x1234);
        assert_eq!(reply.response_code(), ResponseCode::NXDomain);
        assert_eq!(question_name(&reply), question_name(&query));
    }
}
