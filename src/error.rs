//! Crate-wide error types.
//!
//! Each module that can fail owns a concrete error enum; conversions between
//! them happen at the boundary where one module calls into another. `main.rs`
//! is the only place that flattens everything into `anyhow::Error` for a
//! single process exit path.

use std::fmt;

/// Failure parsing or serializing a DNS wire message (C1).
#[derive(Debug)]
pub enum CodecError {
    /// The underlying `hickory-proto` parser rejected the bytes.
    Malformed(hickory_proto::error::ProtoError),
    /// A synthesized message could not be serialized back to wire bytes.
    Serialize(hickory_proto::error::ProtoError),
    /// The packet was shorter than a DNS header.
    Truncated,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed DNS message: {e}"),
            Self::Serialize(e) => write!(f, "failed to serialize DNS message: {e}"),
            Self::Truncated => write!(f, "packet shorter than a DNS header"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<hickory_proto::error::ProtoError> for CodecError {
    fn from(e: hickory_proto::error::ProtoError) -> Self {
        Self::Malformed(e)
    }
}

/// Failure sending a query to, or reading a reply from, one upstream (C3).
#[derive(Debug)]
pub enum TransportError {
    /// The socket operation itself failed (connect/send/recv).
    Io(std::io::Error),
    /// No reply arrived before the per-query timeout elapsed.
    Timeout,
    /// The reply bytes did not parse as a DNS message.
    Codec(CodecError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "transport I/O error: {e}"),
            Self::Timeout => write!(f, "upstream query timed out"),
            Self::Codec(e) => write!(f, "reply codec error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for TransportError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

/// A single configuration offense, collected rather than raised eagerly so
/// that `Config::build` can report every problem at once (spec.md §9).
#[derive(Debug)]
pub struct ConfigIssue(pub String);

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Startup configuration failure (category (a) in spec.md §7: refuse to start).
#[derive(Debug)]
pub struct ConfigError {
    pub issues: Vec<ConfigIssue>,
}

impl ConfigError {
    pub fn new(issues: Vec<ConfigIssue>) -> Self {
        Self { issues }
    }

    pub fn single(msg: impl Into<String>) -> Self {
        Self::new(vec![ConfigIssue(msg.into())])
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "invalid configuration ({} issue(s)):", self.issues.len())?;
        for issue in &self.issues {
            writeln!(f, "  - {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::single(e.to_string())
    }
}

/// Failure handling a single client query end to end in the dispatcher (C5).
///
/// Every variant maps to exactly one outbound reply per spec.md §7 — the
/// dispatcher never propagates this type outward, it converts it to a
/// synthesized reply immediately.
#[derive(Debug)]
pub enum DispatchError {
    /// The client packet itself did not parse.
    BadRequest(CodecError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(e) => write!(f, "malformed client request: {e}"),
        }
    }
}

impl std::error::Error for DispatchError {}
