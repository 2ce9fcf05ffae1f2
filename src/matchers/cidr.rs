//! Binary (bit-at-a-time) trie over the IPv4 and IPv6 address spaces.
//!
//! This is the "patricia-style structure" spec.md §3/§4.2 asks for: insertion
//! walks the prefix bit by bit from the network's MSB, lookup walks the same
//! path for a candidate address and returns true the moment it passes a node
//! that was marked as a network boundary during insertion. Both operations
//! are O(prefix length) — 32 for IPv4, 128 for IPv6 — and never revisit a
//! bit once consumed.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;

#[derive(Debug, Default)]
struct TrieNode {
    children: [Option<Box<TrieNode>>; 2],
    /// Set when some inserted network terminates exactly at this node —
    /// every address below it is covered regardless of remaining bits.
    network: bool,
}

impl TrieNode {
    fn insert(&mut self, bits: &[bool]) {
        let mut node = self;
        for &bit in bits {
            node = node.children[bit as usize].get_or_insert_with(Default::default);
            if node.network {
                // A shorter prefix already covers this range; no need to
                // descend further, the lookup will stop here too.
                return;
            }
        }
        node.network = true;
    }

    fn contains(&self, bits: &[bool]) -> bool {
        let mut node = self;
        for &bit in bits {
            if node.network {
                return true;
            }
            match &node.children[bit as usize] {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.network
    }
}

/// A CIDR range set supporting O(prefix) membership tests, built once at
/// startup and read concurrently thereafter without locks.
#[derive(Debug)]
pub struct CidrTrie {
    v4: TrieNode,
    v6: TrieNode,
    empty: bool,
    has_v6: bool,
}

impl Default for CidrTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl CidrTrie {
    pub fn new() -> Self {
        Self {
            v4: TrieNode::default(),
            v6: TrieNode::default(),
            empty: true,
            has_v6: false,
        }
    }

    /// Insert one CIDR network.
    pub fn insert(&mut self, net: IpNet) {
        self.empty = false;
        match net {
            IpNet::V4(n) => self.v4.insert(&bits_v4(n.network(), n.prefix_len())),
            IpNet::V6(n) => {
                self.has_v6 = true;
                self.v6.insert(&bits_v6(n.network(), n.prefix_len()));
            }
        }
    }

    /// Whether this set contains any IPv6 network — used by the dispatcher
    /// to decide whether AAAA records are subject to the CHNRoute filter at
    /// all (spec.md §9 Open Question (c)).
    pub fn has_ipv6_entries(&self) -> bool {
        self.has_v6
    }

    /// Insert a bare address as a host-mask network (/32 or /128), per
    /// spec.md §6 `IPBlacklist` format.
    pub fn insert_host(&mut self, ip: IpAddr) {
        let net = match ip {
            IpAddr::V4(v4) => IpNet::new(IpAddr::V4(v4), 32).expect("/32 is always valid"),
            IpAddr::V6(v6) => IpNet::new(IpAddr::V6(v6), 128).expect("/128 is always valid"),
        };
        self.insert(net);
    }

    /// Whether `ip` falls inside any inserted range. Returns `false` on an
    /// empty/unloaded matcher, per spec.md §4.2.
    pub fn contains(&self, ip: IpAddr) -> bool {
        if self.empty {
            return false;
        }
        match ip {
            IpAddr::V4(v4) => self.v4.contains(&bits_v4(v4, 32)),
            IpAddr::V6(v6) => self.v6.contains(&bits_v6(v6, 128)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }
}

fn bits_v4(addr: Ipv4Addr, prefix_len: u8) -> Vec<bool> {
    let bits = u32::from(addr);
    (0..prefix_len as u32).map(|i| (bits >> (31 - i)) & 1 == 1).collect()
}

fn bits_v6(addr: Ipv6Addr, prefix_len: u8) -> Vec<bool> {
    let bits = u128::from(addr);
    (0..prefix_len as u32).map(|i| (bits >> (127 - i)) & 1 == 1).collect()
}
