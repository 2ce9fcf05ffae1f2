//! Health Check (C7): resolve every configured `TestDomains` entry through
//! every upstream at startup, pruning upstreams that fail all of them.
//!
//! Reuses the Upstream Client (C3) directly rather than opening a separate
//! transport path, per spec.md §4.7's expansion: the canary query is a
//! completely ordinary DNS query, just one the listener never sees.

use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use std::str::FromStr;

use crate::codec;
use crate::config::Config;
use crate::upstream::client;
use crate::upstream::Upstream;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Prune every upstream that fails to answer any test domain. Returns an
/// error (via the empty-pool check the caller performs) only indirectly —
/// this function just mutates the pools; `main.rs` checks for emptiness
/// afterwards per spec.md §6 "fail startup if a pool ends up empty".
pub async fn run(config: &mut Config) {
    if config.test_domains.is_empty() {
        return;
    }

    let probes: Vec<Vec<u8>> = config
        .test_domains
        .iter()
        .filter_map(|domain| build_probe(domain))
        .collect();
    if probes.is_empty() {
        return;
    }

    config.trusted = prune(std::mem::take(&mut config.trusted), &probes).await;
    config.untrusted = prune(std::mem::take(&mut config.untrusted), &probes).await;
}

async fn prune(upstreams: Vec<Upstream>, probes: &[Vec<u8>]) -> Vec<Upstream> {
    let mut survivors = Vec::with_capacity(upstreams.len());
    for upstream in upstreams {
        if any_probe_succeeds(&upstream, probes).await {
            survivors.push(upstream);
        } else {
            tracing::warn!(addr = %upstream.addr, "upstream failed every health-check domain; removing from pool");
        }
    }
    survivors
}

async fn any_probe_succeeds(upstream: &Upstream, probes: &[Vec<u8>]) -> bool {
    for probe in probes {
        if client::query(upstream, probe, PROBE_TIMEOUT).await.is_ok() {
            return true;
        }
    }
    false
}

fn build_probe(domain: &str) -> Option<Vec<u8>> {
    let name = Name::from_str(domain).ok()?;
    let mut msg = Message::new();
    msg.set_id(0); // overwritten per-send by a fresh id below
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut q = Query::new();
    q.set_name(name);
    q.set_query_class(DNSClass::IN);
    q.set_query_type(RecordType::A);
    msg.add_query(q);
    let mut bytes = codec::serialize(&msg).ok()?;
    codec::set_id(&mut bytes, rand_like_id(domain));
    Some(bytes)
}

/// A small deterministic spread of transaction ids across probes, since this
/// module has no business pulling in a full RNG dependency just to avoid
/// every canary query sharing id 0.
fn rand_like_id(domain: &str) -> u16 {
    domain.bytes().fold(0u16, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u16))
}
