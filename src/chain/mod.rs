//! Chain access - single-chain RPC provider pool with automatic failover
//!
//! This module provides:
//! - Multi-RPC provider management with rotating failover
//! - The read and broadcast primitives the signer backend builds on
//! - Address-book name resolution with on-chain ENS fallback

pub mod resolver;

pub use resolver::{AddressBook, EnsResolve, NameResolver};

use crate::config::ChainSettings;
use crate::error::{ToolError, ToolResult};

use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainClient {
    config: ChainSettings,
    /// HTTP providers (multiple for failover)
    providers: Vec<Provider<Http>>,
    /// Current active provider index
    current: AtomicUsize,
}

impl ChainClient {
    pub fn new(config: ChainSettings) -> ToolResult<Self> {
        let mut providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("added RPC provider {url}");
                }
                Err(e) => {
                    warn!("failed to create provider for {url}: {e}");
                }
            }
        }

        if providers.is_empty() {
            return Err(ToolError::ChainConnection(
                "no valid RPC providers".to_string(),
            ));
        }

        Ok(Self {
            config,
            providers,
            current: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("failover to RPC provider {next}");
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Ether balance of an account, with failover
    pub async fn get_balance(&self, who: Address) -> ToolResult<U256> {
        for _ in 0..self.providers.len() {
            match self.http().get_balance(who, None).await {
                Ok(balance) => return Ok(balance),
                Err(e) => {
                    warn!("failed to get balance: {e}");
                    self.failover();
                }
            }
        }

        Err(ToolError::ChainConnection(
            "all providers failed".to_string(),
        ))
    }

    /// Next nonce for an account, counting pending transactions
    pub async fn next_nonce(&self, who: Address) -> ToolResult<u64> {
        self.transaction_count(who, BlockNumber::Pending).await
    }

    /// Lowest nonce not yet included in a block for an account
    pub async fn confirmed_nonce(&self, who: Address) -> ToolResult<u64> {
        self.transaction_count(who, BlockNumber::Latest).await
    }

    async fn transaction_count(&self, who: Address, block: BlockNumber) -> ToolResult<u64> {
        for _ in 0..self.providers.len() {
            match self.http().get_transaction_count(who, Some(block.into())).await {
                Ok(count) => return Ok(count.as_u64()),
                Err(e) => {
                    warn!("failed to get transaction count: {e}");
                    self.failover();
                }
            }
        }

        Err(ToolError::ChainConnection(
            "all providers failed".to_string(),
        ))
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> ToolResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| ToolError::Transaction(format!("gas estimation failed: {e}")))
    }

    /// Broadcast a signed transaction and return its hash
    pub async fn send_raw(&self, raw: Bytes) -> ToolResult<H256> {
        self.http()
            .send_raw_transaction(raw)
            .await
            .map(|pending| pending.tx_hash())
            .map_err(|e| ToolError::Transaction(e.to_string()))
    }

    /// Resolve an ENS name on chain
    pub async fn resolve_ens(&self, name: &str) -> ToolResult<Address> {
        self.http()
            .resolve_name(name)
            .await
            .map_err(|e| ToolError::Resolution(format!("could not resolve {name:?}: {e}")))
    }
}
