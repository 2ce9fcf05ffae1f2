//! Dispatcher / Selector (C5): the central algorithm (spec.md §4.5).
//!
//! One coordinator per inbound client query fans a copy of the request out
//! to every upstream in the relevant pool(s), applies the acceptance rules
//! to each reply as it arrives at a single merge point, and returns the
//! first reply that passes. Modelled as a merge loop over an mpsc channel
//! plus two timers (untrusted delay, overall deadline) rather than a
//! cancellation-token crate: committing a winner simply aborts every
//! `JoinHandle` still outstanding, which drops that task's socket and
//! unblocks any read it was suspended on (spec.md §9 "implementations
//! without cooperative cancellation must close the underlying sockets").

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::codec;
use crate::config::{Config, Matchers};
use crate::error::{DispatchError, TransportError};
use crate::mutator;
use crate::upstream::{client, Pool, Upstream};

pub struct Dispatcher {
    config: Arc<Config>,
}

enum Outcome {
    Reply { mutated: bool, bytes: Vec<u8> },
    Failed,
}

struct Completion {
    pool: Pool,
    outcome: Outcome,
}

impl Dispatcher {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Handle one inbound client query end to end. Always returns a
    /// well-formed reply (substantive answer, NXDOMAIN, or SERVFAIL) except
    /// when the client's own packet is too malformed to extract a
    /// transaction id and question from — that case is reported as
    /// `DispatchError::BadRequest` so the listener can silently drop it
    /// rather than fabricate a reply with no id to echo.
    pub async fn handle(
        &self,
        request: &[u8],
        client_addr: SocketAddr,
    ) -> Result<Vec<u8>, DispatchError> {
        let message = codec::parse(request).map_err(DispatchError::BadRequest)?;
        let client_id = message.id();
        let qname = codec::question_name(&message).map(|n| n.to_ascii());

        let span = tracing::info_span!(
            "query",
            client = %client_addr,
            qname = qname.as_deref().unwrap_or("?"),
            id = client_id,
        );

        self.dispatch(request, message, client_id, qname)
            .instrument(span)
            .await
    }

    async fn dispatch(
        &self,
        request: &[u8],
        message: Message,
        client_id: u16,
        qname: Option<String>,
    ) -> Result<Vec<u8>, DispatchError> {
        let matchers = &self.config.matchers;

        if let Some(name) = &qname {
            if matchers.domain_blacklist.has_suffix(name) {
                tracing::info!(event = "policy_domain_blacklist", qname = %name, "domain blacklist match");
                return codec::nxdomain_reply(&message).map_err(DispatchError::BadRequest);
            }
        }

        let trusted_only = qname
            .as_ref()
            .is_some_and(|n| matchers.domain_polluted.has_suffix(n));
        if trusted_only {
            tracing::debug!(event = "trusted_only", "domain polluted match; skipping untrusted pool");
        }

        let reply = self
            .fan_out(request, &message, client_id, trusted_only)
            .await;

        match reply {
            Some(bytes) => Ok(bytes),
            None => {
                tracing::info!(event = "deadline_expired", "no acceptable reply before deadline");
                codec::servfail_reply(&message).map_err(DispatchError::BadRequest)
            }
        }
    }

    async fn fan_out(
        &self,
        request: &[u8],
        message: &Message,
        client_id: u16,
        trusted_only: bool,
    ) -> Option<Vec<u8>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        let mutated_request = if self.config.mutation {
            Some(mutator::mutate(request, message))
        } else {
            None
        };

        for upstream in &self.config.trusted {
            let bytes = mutated_request.as_deref().unwrap_or(request).to_vec();
            handles.push(self.spawn_attempt(Pool::Trusted, upstream.clone(), bytes, self.config.mutation, tx.clone()));
        }
        let mut trusted_outstanding = self.config.trusted.len();

        let mut untrusted_outstanding = 0usize;
        let mut untrusted_fired = trusted_only;
        let delay = if trusted_only { Duration::ZERO } else { self.config.delay };

        if !trusted_only && delay.is_zero() {
            for upstream in &self.config.untrusted {
                handles.push(self.spawn_attempt(Pool::Untrusted, upstream.clone(), request.to_vec(), false, tx.clone()));
            }
            untrusted_outstanding = self.config.untrusted.len();
            untrusted_fired = true;
        }
        // `tx` itself stays alive until `fan_out` returns: the delayed
        // untrusted fan-out below still needs to `tx.clone()` it. Every
        // spawned attempt holds its own clone and drops it on completion, so
        // the merge loop terminates via the outstanding-count/deadline
        // bookkeeping rather than relying on the channel closing.

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);
        let delay_timer = tokio::time::sleep(delay);
        tokio::pin!(delay_timer);

        let mut held_untrusted: Option<Vec<u8>> = None;
        let mut accepted: Option<Vec<u8>> = None;

        loop {
            if accepted.is_some() {
                break;
            }
            if trusted_outstanding == 0 && untrusted_fired && untrusted_outstanding == 0 {
                if let Some(held) = held_untrusted.take() {
                    accepted = Some(held);
                }
                break;
            }

            tokio::select! {
                _ = &mut delay_timer, if !untrusted_fired => {
                    for upstream in &self.config.untrusted {
                        handles.push(self.spawn_attempt(Pool::Untrusted, upstream.clone(), request.to_vec(), false, tx.clone()));
                    }
                    untrusted_outstanding = self.config.untrusted.len();
                    untrusted_fired = true;
                    if untrusted_outstanding == 0 && trusted_outstanding == 0 {
                        break;
                    }
                }
                _ = &mut deadline => {
                    accepted = held_untrusted.take();
                    break;
                }
                maybe = rx.recv() => {
                    let Some(completion) = maybe else { break };
                    if completion.pool == Pool::Trusted {
                        trusted_outstanding -= 1;
                    } else {
                        untrusted_outstanding -= 1;
                    }

                    let Outcome::Reply { mutated, bytes } = completion.outcome else {
                        continue;
                    };
                    let Ok(reply_msg) = codec::parse(&bytes) else {
                        tracing::debug!(pool = ?completion.pool, "dropping unparseable reply");
                        continue;
                    };

                    match evaluate(completion.pool, message, &reply_msg, &self.config.matchers, self.config.bidirectional) {
                        Verdict::Accept if completion.pool == Pool::Trusted => {
                            tracing::info!(event = "accepted_trusted");
                            accepted = Some(finalize(bytes, mutated, client_id));
                        }
                        Verdict::Accept => {
                            tracing::debug!(event = "accepted_untrusted_china", "holding candidate until trusted pool is exhausted");
                            held_untrusted = Some(finalize(bytes, false, client_id));
                        }
                        Verdict::Discard(reason) => {
                            tracing::debug!(event = reason, pool = ?completion.pool, "discarding candidate reply");
                        }
                    }
                }
            }
        }

        for handle in handles {
            handle.abort();
        }

        accepted
    }

    fn spawn_attempt(
        &self,
        pool: Pool,
        upstream: Upstream,
        bytes: Vec<u8>,
        mutated: bool,
        tx: mpsc::UnboundedSender<Completion>,
    ) -> JoinHandle<()> {
        let timeout = self.config.timeout;
        tokio::spawn(async move {
            let outcome = match client::query(&upstream, &bytes, timeout).await {
                Ok(reply) => Outcome::Reply { mutated, bytes: reply },
                Err(err) => {
                    log_transport_error(&upstream, &err);
                    Outcome::Failed
                }
            };
            let _ = tx.send(Completion { pool, outcome });
        })
    }
}

fn log_transport_error(upstream: &Upstream, err: &TransportError) {
    tracing::debug!(addr = %upstream.addr, error = %err, "upstream query failed");
}

fn finalize(reply: Vec<u8>, mutated: bool, client_id: u16) -> Vec<u8> {
    if mutated {
        mutator::reverse(&reply, client_id).unwrap_or(reply)
    } else {
        let mut reply = reply;
        codec::set_id(&mut reply, client_id);
        reply
    }
}

enum Verdict {
    Accept,
    Discard(&'static str),
}

fn evaluate(pool: Pool, query: &Message, reply: &Message, matchers: &Matchers, bidirectional: bool) -> Verdict {
    let ips = codec::answer_ips(reply);

    match pool {
        Pool::Trusted => {
            if !bidirectional {
                return Verdict::Accept;
            }
            if relevant_ips(&ips, &matchers.china)
                .iter()
                .any(|ip| matchers.china.contains(*ip))
            {
                Verdict::Discard("discarded_china_bidirectional")
            } else {
                Verdict::Accept
            }
        }
        Pool::Untrusted => {
            if ips.iter().any(|ip| matchers.ip_blacklist.contains(*ip)) {
                return Verdict::Discard("discarded_blacklisted_ip");
            }
            // The Untrusted pool's authority is entirely IP-geography-based;
            // it has nothing meaningful to say about a non-address query.
            if !codec::is_address_query(query) {
                return Verdict::Discard("discarded_untrusted_non_address");
            }
            let relevant = relevant_ips(&ips, &matchers.china);
            if relevant.iter().all(|ip| matchers.china.contains(*ip)) {
                Verdict::Accept
            } else {
                Verdict::Discard("discarded_untrusted_non_china")
            }
        }
    }
}

/// Answer IPs subject to the CHNRoute filter: every A record always, AAAA
/// records only when the China CIDR set actually carries IPv6 entries
/// (spec.md §9 Open Question (c)).
fn relevant_ips(ips: &[IpAddr], china: &crate::matchers::CidrTrie) -> Vec<IpAddr> {
    ips.iter()
        .copied()
        .filter(|ip| matches!(ip, IpAddr::V4(_)) || china.has_ipv6_entries())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::{CidrTrie, DomainTrie};

    fn sample_reply(ips: &[IpAddr]) -> Message {
        use hickory_proto::rr::rdata::{A, AAAA};
        use hickory_proto::rr::{Name, RData, Record};
        use std::str::FromStr;

        let mut msg = Message::new();
        msg.set_id(1);
        let name = Name::from_str("example.com.").unwrap();
        for ip in ips {
            let rdata = match ip {
                IpAddr::V4(v4) => RData::A(A(*v4)),
                IpAddr::V6(v6) => RData::AAAA(AAAA(*v6)),
            };
            msg.add_answer(Record::from_rdata(name.clone(), 60, rdata));
        }
        msg
    }

    fn sample_query(qtype: hickory_proto::rr::RecordType) -> Message {
        use hickory_proto::rr::Name;
        use std::str::FromStr;

        let mut msg = Message::new();
        msg.set_id(1);
        let mut q = hickory_proto::op::Query::new();
        q.set_name(Name::from_str("example.com.").unwrap());
        q.set_query_class(hickory_proto::rr::DNSClass::IN);
        q.set_query_type(qtype);
        msg.add_query(q);
        msg
    }

    fn a_query() -> Message {
        sample_query(hickory_proto::rr::RecordType::A)
    }

    fn matchers_with_china(china: CidrTrie, ip_blacklist: CidrTrie) -> Matchers {
        Matchers {
            china,
            ip_blacklist,
            domain_blacklist: DomainTrie::new(),
            domain_polluted: DomainTrie::new(),
        }
    }

    #[test]
    fn trusted_non_bidirectional_always_accepts() {
        let reply = sample_reply(&["220.181.38.148".parse().unwrap()]);
        let mut china = CidrTrie::new();
        china.insert("220.181.0.0/16".parse().unwrap());
        let matchers = matchers_with_china(china, CidrTrie::new());
        assert!(matches!(
            evaluate(Pool::Trusted, &a_query(), &reply, &matchers, false),
            Verdict::Accept
        ));
    }

    #[test]
    fn trusted_bidirectional_discards_china_answer() {
        let reply = sample_reply(&["220.181.38.148".parse().unwrap()]);
        let mut china = CidrTrie::new();
        china.insert("220.181.0.0/16".parse().unwrap());
        let matchers = matchers_with_china(china, CidrTrie::new());
        assert!(matches!(
            evaluate(Pool::Trusted, &a_query(), &reply, &matchers, true),
            Verdict::Discard(_)
        ));
    }

    #[test]
    fn untrusted_all_china_is_accepted() {
        let reply = sample_reply(&["114.114.114.114".parse().unwrap()]);
        let mut china = CidrTrie::new();
        china.insert("114.114.0.0/16".parse().unwrap());
        let matchers = matchers_with_china(china, CidrTrie::new());
        assert!(matches!(
            evaluate(Pool::Untrusted, &a_query(), &reply, &matchers, false),
            Verdict::Accept
        ));
    }

    #[test]
    fn untrusted_non_china_is_discarded() {
        let reply = sample_reply(&["93.184.216.34".parse().unwrap()]);
        let mut china = CidrTrie::new();
        china.insert("114.114.0.0/16".parse().unwrap());
        let matchers = matchers_with_china(china, CidrTrie::new());
        assert!(matches!(
            evaluate(Pool::Untrusted, &a_query(), &reply, &matchers, false),
            Verdict::Discard(_)
        ));
    }

    #[test]
    fn untrusted_blacklisted_ip_is_discarded_even_if_in_china() {
        let reply = sample_reply(&["1.2.3.4".parse().unwrap()]);
        let mut china = CidrTrie::new();
        china.insert("1.2.3.0/24".parse().unwrap());
        let mut blacklist = CidrTrie::new();
        blacklist.insert_host("1.2.3.4".parse().unwrap());
        let matchers = matchers_with_china(china, blacklist);
        assert!(matches!(
            evaluate(Pool::Untrusted, &a_query(), &reply, &matchers, false),
            Verdict::Discard("discarded_blacklisted_ip")
        ));
    }

    #[test]
    fn aaaa_bypasses_chnroute_when_china_set_has_no_ipv6_entries() {
        let reply = sample_reply(&["2001:db8::1".parse().unwrap()]);
        let china = {
            let mut t = CidrTrie::new();
            t.insert("114.114.0.0/16".parse().unwrap());
            t
        };
        let matchers = matchers_with_china(china, CidrTrie::new());
        // No IPv4 entries to check against, IPv6 bypasses -> vacuously "all relevant in china".
        assert!(matches!(
            evaluate(Pool::Untrusted, &a_query(), &reply, &matchers, false),
            Verdict::Accept
        ));
    }

    #[test]
    fn untrusted_non_address_query_is_never_accepted() {
        let reply = sample_reply(&["114.114.114.114".parse().unwrap()]);
        let mut china = CidrTrie::new();
        china.insert("114.114.0.0/16".parse().unwrap());
        let matchers = matchers_with_china(china, CidrTrie::new());
        let query = sample_query(hickory_proto::rr::RecordType::MX);
        assert!(matches!(
            evaluate(Pool::Untrusted, &query, &reply, &matchers, false),
            Verdict::Discard("discarded_untrusted_non_address")
        ));
    }
}
