//! Matchers (C2): CIDR range membership and domain suffix membership.
//!
//! Every matcher here is built once at startup (`load_*` functions) and
//! shared read-only thereafter; see `Matchers` in `config.rs` for how the
//! four concrete sets (China CIDR, IP blacklist, domain blacklist, domain
//! polluted) are assembled from configured file paths.

pub mod cidr;
pub mod domain;

use std::fs;
use std::net::IpAddr;
use std::path::Path;

pub use cidr::CidrTrie;
pub use domain::DomainTrie;

use crate::error::ConfigError;

/// Load a CIDR-lines file into a `CidrTrie`. Blank lines and `#`-comments are
/// ignored, per spec.md §6. Each non-comment line is either a CIDR
/// (`10.0.0.0/8`) or a bare IP, which is expanded to a host mask.
pub fn load_cidr_file(path: &Path) -> Result<CidrTrie, ConfigError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::single(format!("reading {}: {e}", path.display())))?;
    let mut trie = CidrTrie::new();
    for (lineno, raw) in contents.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(net) = line.parse::<ipnet::IpNet>() {
            trie.insert(net);
        } else if let Ok(ip) = line.parse::<IpAddr>() {
            trie.insert_host(ip);
        } else {
            return Err(ConfigError::single(format!(
                "{}:{}: not a valid CIDR or IP address: {line:?}",
                path.display(),
                lineno + 1
            )));
        }
    }
    Ok(trie)
}

/// Load a domains-one-per-line file into a `DomainTrie`.
pub fn load_domain_file(path: &Path) -> Result<DomainTrie, ConfigError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::single(format!("reading {}: {e}", path.display())))?;
    let mut trie = DomainTrie::new();
    for raw in contents.lines() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if !line.is_empty() {
            trie.insert(line);
        }
    }
    Ok(trie)
}
