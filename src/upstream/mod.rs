//! Upstream data model and pool classification (spec.md §3).

pub mod client;

use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::matchers::CidrTrie;

/// Transport protocol attempted for one upstream query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
}

/// One configured upstream resolver: an address plus an ordered protocol
/// list. Equality is by address only (spec.md §3).
#[derive(Debug, Clone)]
pub struct Upstream {
    pub addr: SocketAddr,
    pub protocols: Vec<Protocol>,
}

impl PartialEq for Upstream {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}
impl Eq for Upstream {}

impl Upstream {
    /// Parse the `[proto+]*address[:port]` schema from spec.md §6.
    ///
    /// Examples: `8.8.8.8`, `tcp+udp+1.1.1.1:53`, `tcp+114.114.114.114`.
    pub fn parse_schema(schema: &str, default_port: u16) -> Result<Self, ConfigError> {
        let mut parts: Vec<&str> = schema.split('+').collect();
        let addr_part = parts
            .pop()
            .ok_or_else(|| ConfigError::single(format!("empty upstream schema: {schema:?}")))?;

        let mut protocols = Vec::new();
        for proto in &parts {
            protocols.push(match *proto {
                "udp" => Protocol::Udp,
                "tcp" => Protocol::Tcp,
                other => {
                    return Err(ConfigError::single(format!(
                        "unknown transport {other:?} in upstream schema {schema:?}"
                    )))
                }
            });
        }
        if protocols.is_empty() {
            protocols = vec![Protocol::Udp, Protocol::Tcp];
        }

        let addr = parse_addr(addr_part, default_port)
            .map_err(|e| ConfigError::single(format!("upstream schema {schema:?}: {e}")))?;

        Ok(Self { addr, protocols })
    }

    /// Force TCP as the sole transport (spec.md §6 `TCPOnly`).
    pub fn force_tcp_only(&mut self) {
        self.protocols = vec![Protocol::Tcp];
    }
}

fn parse_addr(s: &str, default_port: u16) -> Result<SocketAddr, String> {
    if let Ok(addr) = SocketAddr::from_str(s) {
        return Ok(addr);
    }
    // No explicit port: try as a bare IP and apply the default port.
    let ip = s
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<std::net::IpAddr>()
        .map_err(|_| format!("not a valid address: {s:?}"))?;
    Ok(SocketAddr::new(ip, default_port))
}

/// Which pool an upstream belongs to (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Trusted,
    Untrusted,
}

/// Classify `servers` (auto-classified) and `trusted_servers` (always
/// trusted) into disjoint Trusted/Untrusted pools, coalescing duplicate
/// addresses. An address with no China CIDR matcher loaded defaults to
/// Trusted with a warning, per spec.md §3.
pub fn classify(
    trusted_servers: Vec<Upstream>,
    servers: Vec<Upstream>,
    china: &CidrTrie,
) -> (Vec<Upstream>, Vec<Upstream>) {
    let mut trusted: Vec<Upstream> = Vec::new();
    let mut untrusted: Vec<Upstream> = Vec::new();

    for upstream in trusted_servers {
        if !trusted.contains(&upstream) {
            trusted.push(upstream);
        }
    }

    for upstream in servers {
        if trusted.contains(&upstream) || untrusted.contains(&upstream) {
            continue;
        }
        if china.is_empty() {
            tracing::warn!(
                addr = %upstream.addr,
                "China CIDR matcher is empty; defaulting upstream to Trusted"
            );
            trusted.push(upstream);
            continue;
        }
        if china.contains(upstream.addr.ip()) {
            untrusted.push(upstream);
        } else {
            trusted.push(upstream);
        }
    }

    (trusted, untrusted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_address_with_default_port() {
        let up = Upstream::parse_schema("8.8.8.8", 53).unwrap();
        assert_eq!(up.addr, "8.8.8.8:53".parse().unwrap());
        assert_eq!(up.protocols, vec![Protocol::Udp, Protocol::Tcp]);
    }

    #[test]
    fn parses_explicit_protocol_order_and_port() {
        let up = Upstream::parse_schema("tcp+udp+1.1.1.1:5353", 53).unwrap();
        assert_eq!(up.addr, "1.1.1.1:5353".parse().unwrap());
        assert_eq!(up.protocols, vec![Protocol::Tcp, Protocol::Udp]);
    }

    #[test]
    fn rejects_unknown_protocol() {
        assert!(Upstream::parse_schema("quic+1.1.1.1", 53).is_err());
    }

    #[test]
    fn classification_splits_by_china_cidr_and_coalesces_duplicates() {
        let mut china = CidrTrie::new();
        china.insert("114.114.0.0/16".parse().unwrap());

        let trusted_in = vec![Upstream::parse_schema("8.8.8.8", 53).unwrap()];
        let servers_in = vec![
            Upstream::parse_schema("114.114.114.114", 53).unwrap(),
            Upstream::parse_schema("9.9.9.9", 53).unwrap(),
            Upstream::parse_schema("8.8.8.8", 53).unwrap(), // duplicate of trusted
        ];

        let (trusted, untrusted) = classify(trusted_in, servers_in, &china);
        assert_eq!(trusted.len(), 2); // 8.8.8.8 + 9.9.9.9
        assert_eq!(untrusted.len(), 1); // 114.114.114.114
        assert!(trusted.iter().all(|u| !untrusted.contains(u)));
    }

    #[test]
    fn empty_china_matcher_defaults_to_trusted() {
        let china = CidrTrie::new();
        let (trusted, untrusted) =
            classify(vec![], vec![Upstream::parse_schema("9.9.9.9", 53).unwrap()], &china);
        assert_eq!(trusted.len(), 1);
        assert!(untrusted.is_empty());
    }
}
