//! Mutator (C4): pointer-compression rewrite of trusted-bound queries
//! (spec.md §4.4), and reversal of the winning reply back to the shape the
//! client sent.
//!
//! Chosen encoding (spec.md §9 Open Question (a)): a DNS name can be
//! terminated either by a zero length-octet or by a two-byte compression
//! pointer `0xC0xx` pointing at an earlier occurrence of the same labels
//! (RFC 1035 §4.1.4). We exploit this by moving the question's QNAME label
//! run to a throwaway copy appended at the very end of the packet, and
//! replacing its *original* location entirely with a two-byte pointer at
//! that new tail copy. A spec-compliant resolver follows the pointer and
//! reconstructs the exact same QNAME; the on-wire byte layout of the
//! question section no longer matches a canonical encoding, which is what
//! defeats naive fixed-offset matching in a poisoning middlebox. QDCOUNT is
//! untouched — the appended bytes are trailing garbage outside any record a
//! parser needs to walk. Critically, the original label bytes are *removed*
//! from the question section, not left in place next to the pointer —
//! leaving them in place would make the name decompress to `<qname>.<qname>`
//! instead of `<qname>`.
//!
//! Because the trick only rewrites trailing bytes, reversal does not need to
//! touch the appended tail: it is enough to drop everything from the
//! original packet length onward and restore the canonical zero-terminated
//! QNAME encoding via a full re-serialize of the parsed reply, with the
//! transaction id overwritten back to the client's original value.

use hickory_proto::op::Message;

use crate::codec;
use crate::error::CodecError;

/// Rewrite `request` (already serialized, `internal_id` as its transaction
/// id) into a mutated form safe to send to a trusted upstream. Returns the
/// mutated bytes; the original `request` is unaffected.
pub fn mutate(request: &[u8], message: &Message) -> Vec<u8> {
    if codec::question_name(message).is_none() {
        return request.to_vec();
    }
    let Some(term_offset) = find_question_terminator(request) else {
        return request.to_vec();
    };

    // The original QNAME's wire encoding — label-length/content pairs plus
    // the terminating zero octet — spans [12, term_offset] inclusive.
    let name_bytes = &request[12..=term_offset];

    let mut out = Vec::with_capacity(request.len() + 2);
    out.extend_from_slice(&request[..12]);
    let pointer_pos = out.len();
    out.extend_from_slice(&[0u8, 0u8]); // placeholder, overwritten below
    out.extend_from_slice(&request[term_offset + 1..]); // QTYPE/QCLASS/rest, untouched

    let tail_offset = out.len();
    if tail_offset > 0x3FFF {
        // Pointer offsets are 14 bits; a packet this large won't fit a
        // forward pointer anyway, so skip mutation rather than corrupt it.
        return request.to_vec();
    }
    out.extend_from_slice(name_bytes);

    let pointer = 0xC000u16 | (tail_offset as u16);
    out[pointer_pos] = (pointer >> 8) as u8;
    out[pointer_pos + 1] = (pointer & 0xFF) as u8;
    out
}

/// Reverse a mutated reply so it matches what the client expects: the
/// client's own transaction id, and a canonically re-encoded question
/// section. Drops the mutation tail by fully re-serializing the parsed
/// message rather than patching bytes in place.
pub fn reverse(reply: &[u8], client_id: u16) -> Result<Vec<u8>, CodecError> {
    let mut message = codec::parse(reply)?;
    message.set_id(client_id);
    codec::serialize(&message)
}

/// Locate the two-byte span holding the zero octet (or pointer) that
/// terminates the first question's QNAME, followed immediately by QTYPE and
/// QCLASS. The DNS header is a fixed 12 bytes, so this walks label-length
/// octets from there.
fn find_question_terminator(bytes: &[u8]) -> Option<usize> {
    let mut pos = 12;
    loop {
        let len = *bytes.get(pos)?;
        if len == 0 {
            return Some(pos);
        }
        if len & 0xC0 != 0 {
            // Already compressed (shouldn't happen for a freshly serialized
            // outgoing query, but bail rather than mutate blindly).
            return None;
        }
        pos += 1 + len as usize;
        if pos >= bytes.len() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{Message, MessageType, OpCode, Query};
    use hickory_proto::rr::{DNSClass, Name, RecordType};
    use std::str::FromStr;

    fn sample_query(id: u16) -> (Message, Vec<u8>) {
        let mut msg = Message::new();
        msg.set_id(id);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        let mut q = Query::new();
        q.set_name(Name::from_str("example.com.").unwrap());
        q.set_query_class(DNSClass::IN);
        q.set_query_type(RecordType::A);
        msg.add_query(q);
        let bytes = codec::serialize(&msg).unwrap();
        (msg, bytes)
    }

    #[test]
    fn mutated_query_still_parses_to_the_same_question() {
        let (msg, bytes) = sample_query(0x1111);
        let mutated = mutate(&bytes, &msg);
        assert!(mutated.len() > bytes.len());

        let parsed = codec::parse(&mutated).unwrap();
        assert_eq!(parsed.id(), 0x1111);
        assert_eq!(
            codec::question_name(&parsed),
            Some(Name::from_str("example.com.").unwrap())
        );
    }

    #[test]
    fn reverse_restores_client_id_and_drops_mutation_tail() {
        let (msg, bytes) = sample_query(0x1111);
        let mutated = mutate(&bytes, &msg);

        // Pretend the upstream echoed the mutated question back as a reply.
        let mut reply_msg = codec::parse(&mutated).unwrap();
        reply_msg.set_message_type(MessageType::Response);
        let reply_bytes = codec::serialize(&reply_msg).unwrap();

        let reversed = reverse(&reply_bytes, 0xBEEF).unwrap();
        let parsed = codec::parse(&reversed).unwrap();
        assert_eq!(parsed.id(), 0xBEEF);
        assert_eq!(
            codec::question_name(&parsed),
            Some(Name::from_str("example.com.").unwrap())
        );
    }
}
