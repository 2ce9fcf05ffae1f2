//! Process entry point. Parses the CLI, builds the immutable `Config`, runs
//! the startup health check, then serves forever. Every fallible step here
//! flattens into `anyhow::Error` for a single process exit path — this is
//! the one place in the crate `anyhow` is used, everywhere else owns a
//! concrete error enum (see `error.rs`).

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use trustroute::cli::Cli;
use trustroute::config::Config;
use trustroute::listener::Listener;
use trustroute::matchers;
use trustroute::{healthcheck, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cli = Cli::parse();

    let china = match &cli.china_cidr {
        Some(path) => matchers::load_cidr_file(path).context("loading China CIDR file")?,
        None => {
            tracing::warn!("no --china-cidr file given; all upstreams default to Trusted");
            matchers::cidr::CidrTrie::new()
        }
    };

    let mut config = Config::build(&cli, china).context("invalid configuration")?;

    healthcheck::run(&mut config).await;
    if config.trusted.is_empty() && config.untrusted.is_empty() {
        anyhow::bail!("every upstream failed the startup health check; refusing to start");
    }

    tracing::info!(
        listen = %config.listen,
        trusted = config.trusted.len(),
        untrusted = config.untrusted.len(),
        "starting trustroute"
    );

    let listener = Listener::bind(Arc::new(config))
        .await
        .context("binding listen address")?;

    tokio::select! {
        res = listener.serve() => res.context("listener terminated")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal, exiting");
        }
    }
    Ok(())
}
