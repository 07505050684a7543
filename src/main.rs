//! ethertool - Ethereum wallet CLI with gas-price strategies, address-book
//! resolution and automatic transaction redispatch
//!
//! All cryptography, signing, RPC transport and ABI encoding are delegated
//! to the ethers SDK; this binary adds the redispatch watcher, the gas
//! oracle client, the address book and the token commands on top.

use anyhow::Result;
use tracing::error;

mod chain;
mod cli;
mod commands;
mod config;
mod erc20;
mod error;
mod gas;
mod tx;
mod units;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    if let Err(e) = cli::run().await {
        error!("{e}");
        std::process::exit(1);
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ethertool=debug"));

    // Diagnostics go to stderr; stdout is reserved for command output.
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
