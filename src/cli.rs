//! Command-line surface and wiring
//!
//! Parses arguments (with `ETHERS_*` environment overrides folded in),
//! assembles the collaborators each subcommand needs and prints the result.

use crate::chain::{AddressBook, ChainClient, NameResolver};
use crate::commands;
use crate::config::Settings;
use crate::erc20::TokenClient;
use crate::error::ToolResult;
use crate::gas::{EthGasStation, GasOracle, PriorityLevel};
use crate::tx::{DispatchEvent, ManagedSigner, RedispatchPolicy, WalletBackend};
use crate::units::format_scaled;

use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use ethers::signers::Signer;
use ethers::types::Address;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Prefix for environment variables that act as command-line options.
pub const ENV_OVERRIDE_PREFIX: &str = "ETHERS_";

const GWEI_DECIMALS: u8 = 9;

#[derive(Parser)]
#[command(
    name = "ethertool",
    version,
    about = "Ethereum wallet CLI with automatic transaction redispatch"
)]
pub struct Cli {
    #[clap(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Parser, Debug)]
pub struct Options {
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
    #[arg(long = "rpc", value_name = "URL", global = true)]
    pub rpc: Option<String>,
    #[arg(
        long = "gas-level",
        value_name = "LEVEL",
        help = "lowest | average | fast | fastest",
        global = true
    )]
    pub gas_level: Option<String>,
    #[arg(long = "address-book", value_name = "PATH", global = true)]
    pub address_book: Option<PathBuf>,
    #[arg(
        long = "no-redispatch",
        action = ArgAction::SetTrue,
        global = true,
        help = "Treat the account as durably managed and skip resubmission"
    )]
    pub no_redispatch: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Get the ether balance of an address
    BalanceOf { address: Option<String> },
    /// Get the token balance of an address
    BalanceOfToken {
        token: String,
        address: Option<String>,
    },
    /// Transfer tokens to a target address
    Transfer {
        token: String,
        target: String,
        amount: String,
    },
    /// Approve a spender for an amount of tokens
    Approve {
        token: String,
        from: String,
        target: String,
        amount: String,
    },
    /// Mint tokens to a target address
    Mint {
        token: String,
        target: String,
        amount: String,
    },
    /// Print a token's decimal precision
    Decimals { token: String },
    /// Print a token's total supply
    TotalSupply { token: String },
    /// Print the active account's private key
    ExportKey,
}

/// Long options the CLI knows, mapped to whether they take a value.
fn cli_options() -> HashMap<String, bool> {
    <Cli as CommandFactory>::command()
        .get_arguments()
        .filter_map(|arg| {
            let long = arg.get_long()?.to_string();
            let takes_value = !matches!(
                arg.get_action(),
                ArgAction::SetTrue | ArgAction::SetFalse | ArgAction::Count
            );
            Some((long, takes_value))
        })
        .collect()
}

/// Fold `ETHERS_<OPTION_NAME>` environment variables into argv as
/// `--option-name <value>` pairs. Explicitly supplied flags always win;
/// variables that match no known option are ignored.
pub fn merge_env_overrides(
    mut args: Vec<String>,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Vec<String> {
    let options = cli_options();

    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_OVERRIDE_PREFIX) else {
            continue;
        };
        let name = name.to_ascii_lowercase().replace('_', "-");
        let Some(takes_value) = options.get(&name) else {
            continue;
        };

        let flag = format!("--{name}");
        let explicit = args
            .iter()
            .any(|arg| *arg == flag || arg.starts_with(&format!("{flag}=")));
        if explicit {
            continue;
        }

        args.push(flag);
        if *takes_value {
            args.push(value);
        }
    }

    args
}

pub async fn run() -> ToolResult<()> {
    let args = merge_env_overrides(std::env::args().collect(), std::env::vars());
    let cli = Cli::parse_from(args);
    let settings = load_settings(&cli.opts)?;
    dispatch(cli.command, settings).await
}

fn load_settings(opts: &Options) -> ToolResult<Settings> {
    let mut settings = Settings::load(opts.config.as_deref())?;

    if let Some(rpc) = &opts.rpc {
        settings.chain.rpc_urls = vec![rpc.clone()];
    }
    if let Some(level) = &opts.gas_level {
        settings.gas.level = level.clone();
    }
    if let Some(path) = &opts.address_book {
        settings.address_book.path = path.clone();
    }
    if opts.no_redispatch {
        settings.wallet.persistent = true;
    }

    settings.validate()?;
    Ok(settings)
}

async fn dispatch(command: Command, settings: Settings) -> ToolResult<()> {
    let chain = Arc::new(ChainClient::new(settings.chain.clone())?);
    let book = AddressBook::load_if_present(&settings.address_book.path)?;
    if !book.is_empty() {
        info!("loaded {} address book entries", book.len());
    }
    let resolver = NameResolver::new(book, chain.clone());

    match command {
        Command::BalanceOf { address } => {
            let who = resolve_or_account(&resolver, &settings, address).await?;
            println!("{}", commands::balance_of(&chain, who).await?);
        }
        Command::BalanceOfToken { token, address } => {
            let token = TokenClient::read_only(resolver.resolve(&token).await?, &chain);
            let who = resolve_or_account(&resolver, &settings, address).await?;
            println!("{}", commands::balance_of_token(&token, who).await?);
        }
        Command::Decimals { token } => {
            let token = TokenClient::read_only(resolver.resolve(&token).await?, &chain);
            println!("{}", commands::decimals(&token).await?);
        }
        Command::TotalSupply { token } => {
            let token = TokenClient::read_only(resolver.resolve(&token).await?, &chain);
            println!("{}", commands::total_supply(&token).await?);
        }
        Command::Transfer {
            token,
            target,
            amount,
        } => {
            let signer = build_signer(&settings, &chain)?;
            let token =
                TokenClient::with_signer(resolver.resolve(&token).await?, &chain, signer.clone());
            let to = resolver.resolve(&target).await?;

            let notifier = spawn_notifier(signer.subscribe());
            println!("{}", commands::transfer(&token, to, &amount).await?);
            settle(&signer).await;
            notifier.abort();
        }
        Command::Approve {
            token,
            from,
            target,
            amount,
        } => {
            let signer = build_signer(&settings, &chain)?;
            let token =
                TokenClient::with_signer(resolver.resolve(&token).await?, &chain, signer.clone());
            let owner = resolver.resolve(&from).await?;
            let spender = resolver.resolve(&target).await?;

            let notifier = spawn_notifier(signer.subscribe());
            let out =
                commands::approve(&token, owner, spender, &amount, signer.address()).await?;
            println!("{out}");
            settle(&signer).await;
            notifier.abort();
        }
        Command::Mint {
            token,
            target,
            amount,
        } => {
            let signer = build_signer(&settings, &chain)?;
            let token =
                TokenClient::with_signer(resolver.resolve(&token).await?, &chain, signer.clone());
            let to = resolver.resolve(&target).await?;

            let notifier = spawn_notifier(signer.subscribe());
            println!("{}", commands::mint(&token, to, &amount).await?);
            settle(&signer).await;
            notifier.abort();
        }
        Command::ExportKey => {
            let wallet = WalletBackend::load_wallet(&settings.wallet.private_key_env)?;
            println!("0x{}", hex::encode(wallet.signer().to_bytes()));
        }
    }

    Ok(())
}

/// Resolve an address argument, falling back to the active account.
async fn resolve_or_account(
    resolver: &NameResolver,
    settings: &Settings,
    address: Option<String>,
) -> ToolResult<Address> {
    match address {
        Some(name) => resolver.resolve(&name).await,
        None => Ok(WalletBackend::load_wallet(&settings.wallet.private_key_env)?.address()),
    }
}

fn build_signer(settings: &Settings, chain: &Arc<ChainClient>) -> ToolResult<Arc<ManagedSigner>> {
    let wallet = WalletBackend::load_wallet(&settings.wallet.private_key_env)?;
    let oracle = Arc::new(GasOracle::new(
        Box::new(EthGasStation::new(settings.gas.endpoint.clone())),
        Duration::from_millis(settings.gas.retry_delay_ms),
    ));
    let level = PriorityLevel::parse(&settings.gas.level);
    let backend = Arc::new(WalletBackend::new(
        chain.clone(),
        oracle,
        wallet,
        level,
        settings.wallet.persistent,
    ));
    let policy = RedispatchPolicy {
        watch_interval: Duration::from_millis(settings.redispatch.watch_interval_ms),
        escalation_percent: settings.redispatch.escalation_percent,
        max_resubmissions: settings.redispatch.max_resubmissions,
        poll_backoff: Duration::from_millis(settings.redispatch.poll_backoff_ms),
    };

    Ok(Arc::new(ManagedSigner::new(backend, policy)))
}

/// Print the two notification lines for every dispatch after a nonce's
/// first: the gas price in gwei, then the transaction hash.
fn spawn_notifier(mut rx: broadcast::Receiver<DispatchEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                DispatchEvent::Dispatched {
                    nonce,
                    hash,
                    gas_price,
                    at,
                } => {
                    info!("nonce {nonce} redispatched at {at}");
                    println!("{}", format_scaled(gas_price, GWEI_DECIMALS));
                    println!("{hash:?}");
                }
                DispatchEvent::Abandoned {
                    nonce,
                    hash,
                    resubmissions,
                    at,
                } => {
                    warn!(
                        "transaction {hash:?} (nonce {nonce}) abandoned at {at} after \
                         {resubmissions} re-broadcasts"
                    );
                }
            }
        }
    })
}

/// Wait for everything submitted through the signer to reach a terminal
/// state, then stop the watcher.
async fn settle(signer: &ManagedSigner) {
    if signer.redispatcher().is_some() {
        info!("waiting for submitted transactions to confirm");
        signer.wait_settled().await;
    }
    signer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn vars(values: &[(&str, &str)]) -> Vec<(String, String)> {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn env_var_becomes_an_option() {
        let merged = merge_env_overrides(
            args(&["ethertool", "balance-of"]),
            vars(&[("ETHERS_RPC", "http://x")]),
        );
        assert_eq!(merged, args(&["ethertool", "balance-of", "--rpc", "http://x"]));
    }

    #[test]
    fn explicit_option_beats_the_environment() {
        let argv = args(&["ethertool", "balance-of", "--rpc", "http://explicit"]);
        let merged = merge_env_overrides(argv.clone(), vars(&[("ETHERS_RPC", "http://env")]));
        assert_eq!(merged, argv);

        let argv = args(&["ethertool", "balance-of", "--rpc=http://explicit"]);
        let merged = merge_env_overrides(argv.clone(), vars(&[("ETHERS_RPC", "http://env")]));
        assert_eq!(merged, argv);
    }

    #[test]
    fn multi_word_options_map_through_underscores() {
        let merged = merge_env_overrides(
            args(&["ethertool", "balance-of"]),
            vars(&[("ETHERS_GAS_LEVEL", "fastest")]),
        );
        assert_eq!(
            merged,
            args(&["ethertool", "balance-of", "--gas-level", "fastest"])
        );
    }

    #[test]
    fn unknown_variables_are_ignored() {
        let argv = args(&["ethertool", "balance-of"]);
        let merged = merge_env_overrides(
            argv.clone(),
            vars(&[("ETHERS_BOGUS", "1"), ("UNRELATED", "2")]),
        );
        assert_eq!(merged, argv);
    }

    #[test]
    fn flag_options_merge_without_a_value() {
        let merged = merge_env_overrides(
            args(&["ethertool", "balance-of"]),
            vars(&[("ETHERS_NO_REDISPATCH", "1")]),
        );
        assert_eq!(
            merged,
            args(&["ethertool", "balance-of", "--no-redispatch"])
        );
    }

    #[test]
    fn parses_merged_argv() {
        let merged = merge_env_overrides(
            args(&["ethertool", "decimals", "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"]),
            vars(&[("ETHERS_RPC", "http://x")]),
        );
        let cli = Cli::try_parse_from(merged).unwrap();
        assert_eq!(cli.opts.rpc.as_deref(), Some("http://x"));
        assert!(matches!(cli.command, Command::Decimals { .. }));
    }

    #[test]
    fn env_overrides_apply_to_settings() {
        let merged = merge_env_overrides(
            args(&["ethertool", "balance-of"]),
            vars(&[("ETHERS_RPC", "http://x")]),
        );
        let cli = Cli::try_parse_from(merged).unwrap();
        let settings = load_settings(&cli.opts).unwrap();
        assert_eq!(settings.chain.rpc_urls, vec!["http://x"]);
    }
}
