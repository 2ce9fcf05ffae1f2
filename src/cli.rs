//! Command-line surface, grounded in the teacher's own `bin` crate use of
//! `clap`'s derive API. Every field here overlays the identically-named TOML
//! key from `--config` (file values win over built-in defaults; CLI flags
//! win over file values) — see `config::Config::build`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "trustroute", about = "A CHNRoute-aware DNS forwarder")]
pub struct Cli {
    /// TOML config file whose fields overlay these defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address/port for UDP+TCP. Default `[::]:53`.
    #[arg(long)]
    pub listen: Option<String>,

    /// File of CIDR lines identifying networks inside China.
    #[arg(long = "china-cidr")]
    pub china_cidr: Option<PathBuf>,

    /// CIDR-or-bare-IP file of addresses known to be poisoning markers.
    #[arg(long = "ip-blacklist")]
    pub ip_blacklist: Option<PathBuf>,

    /// Domain-per-line file; matching names get an immediate NXDOMAIN.
    #[arg(long = "domain-blacklist")]
    pub domain_blacklist: Option<PathBuf>,

    /// Domain-per-line file; matching names are restricted to Trusted.
    #[arg(long = "domain-polluted")]
    pub domain_polluted: Option<PathBuf>,

    /// Upstream schema, always placed in the Trusted pool. Repeatable.
    #[arg(long = "trusted-server")]
    pub trusted_server: Vec<String>,

    /// Upstream schema, auto-classified by China CIDR membership. Repeatable.
    #[arg(long = "server")]
    pub server: Vec<String>,

    /// Per-query overall deadline, e.g. `1s`, `500ms`.
    #[arg(long)]
    pub timeout: Option<String>,

    /// Max UDP payload bytes accepted from, and advertised to, clients.
    #[arg(long = "udp-max-size")]
    pub udp_max_size: Option<usize>,

    /// Force TCP as the sole transport for every upstream.
    #[arg(long = "tcp-only")]
    pub tcp_only: bool,

    /// Enable pointer-compression mutation of trusted-bound queries.
    #[arg(long)]
    pub mutation: bool,

    /// Discard trusted replies whose answer IPs fall inside China CIDR.
    #[arg(long)]
    pub bidirectional: bool,

    /// Enable SO_REUSEPORT on the listening sockets.
    #[arg(long = "reuse-port")]
    pub reuse_port: bool,

    /// Hold untrusted fan-out this long after trusted fan-out begins.
    #[arg(long)]
    pub delay: Option<String>,

    /// Canary domain resolved through every upstream at startup. Repeatable.
    #[arg(long = "test-domain")]
    pub test_domain: Vec<String>,
}
