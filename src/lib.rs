//! `trustroute`: a CHNRoute-aware DNS forwarder.
//!
//! Inbound queries are fanned out to a Trusted and, conditionally, an
//! Untrusted upstream pool; replies are filtered against CHNRoute and an IP
//! blacklist before the first acceptable one is forwarded to the client.
//! See `dispatcher` for the central algorithm.

pub mod cli;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod healthcheck;
pub mod listener;
pub mod matchers;
pub mod mutator;
pub mod observability;
pub mod upstream;
