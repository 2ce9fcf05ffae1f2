//! Immutable configuration record (C5-adjacent ambient module), grounded in
//! DESIGN NOTES §9: "wrap-style configuration builders... re-architected as
//! a single immutable configuration record built once from parsed inputs;
//! validation returns a rich error listing all offenses."
//!
//! `Config::build` takes the China CIDR matcher as a required argument
//! rather than a field set after construction, which is how this crate
//! replaces the `errNotReady` sentinel the teacher lineage used to guard the
//! same ordering requirement: there is no `Config` value that can exist with
//! classified upstreams but no China CIDR matcher.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::cli::Cli;
use crate::error::{ConfigError, ConfigIssue};
use crate::matchers::{self, CidrTrie, DomainTrie};
use crate::upstream::{self, Pool, Upstream};

const DEFAULT_LISTEN: &str = "[::]:53";
const DEFAULT_PORT: u16 = 53;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_UDP_MAX_SIZE: usize = 4096;

/// The four read-only lookup structures shared across every client query
/// without locks (spec.md §5 "Shared resources").
#[derive(Debug, Default)]
pub struct Matchers {
    pub china: CidrTrie,
    pub ip_blacklist: CidrTrie,
    pub domain_blacklist: DomainTrie,
    pub domain_polluted: DomainTrie,
}

/// TOML overlay file, every field optional; file values win over built-in
/// defaults, and CLI flags win over file values (merged in `Config::build`).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileConfig {
    pub listen: Option<String>,
    pub china_cidr: Option<PathBuf>,
    pub ip_blacklist: Option<PathBuf>,
    pub domain_blacklist: Option<PathBuf>,
    pub domain_polluted: Option<PathBuf>,
    #[serde(default)]
    pub trusted_server: Vec<String>,
    #[serde(default)]
    pub server: Vec<String>,
    pub timeout: Option<String>,
    pub udp_max_size: Option<usize>,
    #[serde(default)]
    pub tcp_only: bool,
    #[serde(default)]
    pub mutation: bool,
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default)]
    pub reuse_port: bool,
    pub delay: Option<String>,
    #[serde(default)]
    pub test_domain: Vec<String>,
}

impl FileConfig {
    fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|e| ConfigError::single(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| ConfigError::single(format!("parsing {}: {e}", path.display())))
    }
}

/// The fully resolved, immutable configuration the rest of the process runs
/// against.
#[derive(Debug)]
pub struct Config {
    pub listen: SocketAddr,
    pub matchers: Matchers,
    pub trusted: Vec<Upstream>,
    pub untrusted: Vec<Upstream>,
    pub timeout: Duration,
    pub udp_max_size: usize,
    pub mutation: bool,
    pub bidirectional: bool,
    pub reuse_port: bool,
    pub delay: Duration,
    pub test_domains: Vec<String>,
}

impl Config {
    /// Build the immutable configuration from CLI flags (optionally
    /// overlaid by a `--config` TOML file) and a pre-loaded China CIDR
    /// matcher. Collects every validation failure rather than stopping at
    /// the first (spec.md §9).
    pub fn build(cli: &Cli, china: CidrTrie) -> Result<Config, ConfigError> {
        let mut issues = Vec::new();

        let file = match &cli.config {
            Some(path) => match FileConfig::load(path) {
                Ok(f) => f,
                Err(e) => {
                    issues.extend(e.issues);
                    FileConfig::default()
                }
            },
            None => FileConfig::default(),
        };

        let listen_str = cli
            .listen
            .clone()
            .or(file.listen.clone())
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen = listen_str.parse::<SocketAddr>().unwrap_or_else(|e| {
            issues.push(ConfigIssue(format!(
                "invalid --listen address {listen_str:?}: {e}"
            )));
            DEFAULT_LISTEN.parse().expect("default listen is valid")
        });

        let timeout_str = cli.timeout.clone().or(file.timeout.clone());
        let timeout = parse_duration_opt(timeout_str, "--timeout", &mut issues)
            .unwrap_or(DEFAULT_TIMEOUT);

        let delay_str = cli.delay.clone().or(file.delay.clone());
        let delay =
            parse_duration_opt(delay_str, "--delay", &mut issues).unwrap_or(Duration::ZERO);

        let udp_max_size = cli
            .udp_max_size
            .or(file.udp_max_size)
            .unwrap_or(DEFAULT_UDP_MAX_SIZE);

        let ip_blacklist = load_or_default(cli.ip_blacklist.as_ref().or(file.ip_blacklist.as_ref()), matchers::load_cidr_file, &mut issues);
        let domain_blacklist = load_or_default(
            cli.domain_blacklist.as_ref().or(file.domain_blacklist.as_ref()),
            matchers::load_domain_file,
            &mut issues,
        );
        let domain_polluted = load_or_default(
            cli.domain_polluted.as_ref().or(file.domain_polluted.as_ref()),
            matchers::load_domain_file,
            &mut issues,
        );

        let tcp_only = cli.tcp_only || file.tcp_only;
        let mutation = cli.mutation || file.mutation;
        let bidirectional = cli.bidirectional || file.bidirectional;
        let reuse_port = cli.reuse_port || file.reuse_port;

        let trusted_schemas = merge_repeatable(&cli.trusted_server, &file.trusted_server);
        let server_schemas = merge_repeatable(&cli.server, &file.server);

        let mut trusted_servers = Vec::new();
        for schema in &trusted_schemas {
            match Upstream::parse_schema(schema, DEFAULT_PORT) {
                Ok(mut up) => {
                    if tcp_only {
                        up.force_tcp_only();
                    }
                    trusted_servers.push(up);
                }
                Err(e) => issues.extend(e.issues),
            }
        }
        let mut servers = Vec::new();
        for schema in &server_schemas {
            match Upstream::parse_schema(schema, DEFAULT_PORT) {
                Ok(mut up) => {
                    if tcp_only {
                        up.force_tcp_only();
                    }
                    servers.push(up);
                }
                Err(e) => issues.extend(e.issues),
            }
        }

        let (trusted, untrusted) = upstream::classify(trusted_servers, servers, &china);

        if trusted.is_empty() && untrusted.is_empty() {
            issues.push(ConfigIssue(
                "no upstreams configured: pass --trusted-server and/or --server at least once"
                    .to_string(),
            ));
        }

        let test_domains = merge_repeatable(&cli.test_domain, &file.test_domain);

        if !issues.is_empty() {
            return Err(ConfigError::new(issues));
        }

        Ok(Config {
            listen,
            matchers: Matchers {
                china,
                ip_blacklist,
                domain_blacklist,
                domain_polluted,
            },
            trusted,
            untrusted,
            timeout,
            udp_max_size,
            mutation,
            bidirectional,
            reuse_port,
            delay,
            test_domains,
        })
    }

    /// All configured upstreams with their pool tag, for the health check.
    pub fn all_upstreams(&self) -> impl Iterator<Item = (Pool, &Upstream)> {
        self.trusted
            .iter()
            .map(|u| (Pool::Trusted, u))
            .chain(self.untrusted.iter().map(|u| (Pool::Untrusted, u)))
    }
}

fn merge_repeatable(cli_values: &[String], file_values: &[String]) -> Vec<String> {
    if !cli_values.is_empty() {
        cli_values.to_vec()
    } else {
        file_values.to_vec()
    }
}

fn load_or_default<T: Default>(
    path: Option<&PathBuf>,
    loader: impl Fn(&std::path::Path) -> Result<T, ConfigError>,
    issues: &mut Vec<ConfigIssue>,
) -> T {
    match path {
        Some(p) => match loader(p) {
            Ok(v) => v,
            Err(e) => {
                issues.extend(e.issues);
                T::default()
            }
        },
        None => T::default(),
    }
}

fn parse_duration_opt(
    value: Option<String>,
    flag: &str,
    issues: &mut Vec<ConfigIssue>,
) -> Option<Duration> {
    let raw = value?;
    match humantime_parse(&raw) {
        Some(d) => Some(d),
        None => {
            issues.push(ConfigIssue(format!("invalid {flag} value {raw:?}")));
            None
        }
    }
}

/// Minimal duration parser accepting `<number><unit>` where unit is one of
/// `ms`, `s`; a bare number is treated as seconds. `humantime`-style syntax
/// without pulling in the crate, since the config surface only ever needs
/// these two units (spec.md §6 `Timeout`/`Delay`).
fn humantime_parse(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(s) = raw.strip_suffix('s') {
        return s.trim().parse::<f64>().ok().map(Duration::from_secs_f64);
    }
    raw.parse::<f64>().ok().map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            server: vec!["8.8.8.8".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn builds_with_defaults_when_only_server_given() {
        let cfg = Config::build(&base_cli(), CidrTrie::new()).unwrap();
        assert_eq!(cfg.listen, DEFAULT_LISTEN.parse().unwrap());
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);
        assert_eq!(cfg.trusted.len(), 1);
    }

    #[test]
    fn rejects_when_no_upstreams_at_all() {
        let cli = Cli::default();
        let err = Config::build(&cli, CidrTrie::new()).unwrap_err();
        assert!(!err.issues.is_empty());
    }

    #[test]
    fn collects_multiple_validation_issues_at_once() {
        let cli = Cli {
            listen: Some("not-an-address".to_string()),
            timeout: Some("not-a-duration".to_string()),
            ..Default::default()
        };
        let err = Config::build(&cli, CidrTrie::new()).unwrap_err();
        assert!(err.issues.len() >= 3); // bad listen, bad timeout, empty pool
    }

    #[test]
    fn parses_millisecond_and_second_durations() {
        assert_eq!(humantime_parse("100ms"), Some(Duration::from_millis(100)));
        assert_eq!(humantime_parse("1s"), Some(Duration::from_secs(1)));
        assert_eq!(humantime_parse("1.5s"), Some(Duration::from_secs_f64(1.5)));
    }
}
