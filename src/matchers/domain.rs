//! Suffix trie over dot-segmented domain labels, grounded on the
//! `StringTrie`-style domain matcher `clash-rs`'s resolver builds its hosts
//! and policy tables from.
//!
//! Labels are inserted from the rightmost (TLD) label inward, so a lookup
//! for any subdomain of an inserted name walks the same path and returns
//! true the moment it passes an inserted terminal node — exactly the
//! "any ancestor suffix is present" rule in spec.md §3.

use std::collections::HashMap;

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, Node>,
    terminal: bool,
}

/// A case-insensitive domain suffix set, built once and read concurrently
/// without locks.
#[derive(Debug, Default)]
pub struct DomainTrie {
    root: Node,
    empty: bool,
}

impl DomainTrie {
    pub fn new() -> Self {
        Self {
            root: Node::default(),
            empty: true,
        }
    }

    /// Insert a domain; any subdomain of it will match `has_suffix`.
    pub fn insert(&mut self, domain: &str) {
        self.empty = false;
        let mut node = &mut self.root;
        for label in labels_rightmost_first(domain) {
            node = node.children.entry(label).or_default();
            if node.terminal {
                // A shorter suffix is already present; it subsumes this one.
                return;
            }
        }
        node.terminal = true;
    }

    /// True iff `name` is, or is a subdomain of, any inserted domain.
    /// Returns `false` on an empty/unloaded matcher (spec.md §4.2).
    pub fn has_suffix(&self, name: &str) -> bool {
        if self.empty {
            return false;
        }
        let mut node = &self.root;
        for label in labels_rightmost_first(name) {
            if node.terminal {
                return true;
            }
            match node.children.get(&label) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.terminal
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }
}

fn labels_rightmost_first(name: &str) -> impl Iterator<Item = String> + '_ {
    name.trim_end_matches('.')
        .to_ascii_lowercase()
        .split('.')
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_trie_never_matches() {
        let trie = DomainTrie::new();
        assert!(!trie.has_suffix("example.com"));
    }

    #[test]
    fn matches_exact_and_subdomains() {
        let mut trie = DomainTrie::new();
        trie.insert("blocked.example");
        assert!(trie.has_suffix("blocked.example"));
        assert!(trie.has_suffix("www.blocked.example"));
        assert!(trie.has_suffix("a.b.blocked.example"));
        assert!(!trie.has_suffix("notblocked.example"));
        assert!(!trie.has_suffix("example"));
    }

    #[test]
    fn is_case_insensitive() {
        let mut trie = DomainTrie::new();
        trie.insert("Example.COM");
        assert!(trie.has_suffix("www.example.com"));
    }

    #[test]
    fn shorter_suffix_subsumes_longer_insert() {
        let mut trie = DomainTrie::new();
        trie.insert("example.com");
        trie.insert("www.example.com");
        assert!(trie.has_suffix("anything.example.com"));
    }
}
