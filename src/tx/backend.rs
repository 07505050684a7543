//! Signer capability seam and the wallet-backed implementation
//!
//! The backend owns everything the redispatcher should not: key material,
//! nonce assignment, gas pricing and the raw broadcast path.

use crate::chain::ChainClient;
use crate::error::{ToolError, ToolResult};
use crate::gas::{GasOracle, PriorityLevel};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a broadcast: what a `send_transaction` caller gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub nonce: u64,
    pub hash: H256,
    pub gas_price: U256,
}

/// Something that can broadcast signed transactions for one account.
#[async_trait]
pub trait SignerBackend: Send + Sync {
    /// Broadcast a transaction, assigning nonce and gas price.
    async fn submit(&self, request: TransactionRequest) -> ToolResult<Dispatched>;

    /// Re-broadcast the same logical transaction with an explicit nonce and
    /// gas price.
    async fn resubmit(
        &self,
        request: TransactionRequest,
        nonce: u64,
        gas_price: U256,
    ) -> ToolResult<Dispatched>;

    /// Lowest nonce not yet included in a block for the signing account.
    async fn confirmed_nonce(&self) -> ToolResult<u64>;

    /// Address the backend signs for.
    fn address(&self) -> Address;

    /// True for durable accounts that manage their own resubmission.
    fn persistent(&self) -> bool {
        false
    }
}

/// Local-wallet backend: oracle-priced, signed locally, broadcast as raw
/// transactions.
pub struct WalletBackend {
    chain: Arc<ChainClient>,
    wallet: LocalWallet,
    oracle: Arc<GasOracle>,
    level: PriorityLevel,
    persistent: bool,
}

impl WalletBackend {
    pub fn new(
        chain: Arc<ChainClient>,
        oracle: Arc<GasOracle>,
        wallet: LocalWallet,
        level: PriorityLevel,
        persistent: bool,
    ) -> Self {
        let wallet = wallet.with_chain_id(chain.chain_id());
        Self {
            chain,
            wallet,
            oracle,
            level,
            persistent,
        }
    }

    /// Load the signing key from the named environment variable.
    pub fn load_wallet(var: &str) -> ToolResult<LocalWallet> {
        let key = std::env::var(var).map_err(|_| {
            ToolError::Wallet(format!("no wallet configured: set {var} to a private key"))
        })?;

        key.trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| ToolError::Wallet(format!("invalid private key in {var}: {e}")))
    }

    async fn broadcast(
        &self,
        request: TransactionRequest,
        nonce: u64,
        gas_price: U256,
    ) -> ToolResult<Dispatched> {
        let request = request
            .from(self.wallet.address())
            .nonce(nonce)
            .gas_price(gas_price);

        let mut tx = TypedTransaction::Legacy(request);
        tx.set_chain_id(self.wallet.chain_id());
        if tx.gas().is_none() {
            let gas = self.chain.estimate_gas(&tx).await?;
            tx.set_gas(gas);
        }

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| ToolError::Wallet(e.to_string()))?;
        let hash = timeout(SEND_TIMEOUT, self.chain.send_raw(tx.rlp_signed(&signature)))
            .await
            .map_err(|_| ToolError::Timeout {
                operation: "send transaction".to_string(),
            })??;

        debug!("broadcast nonce {nonce} at gas price {gas_price} as {hash:?}");
        Ok(Dispatched {
            nonce,
            hash,
            gas_price,
        })
    }
}

#[async_trait]
impl SignerBackend for WalletBackend {
    async fn submit(&self, request: TransactionRequest) -> ToolResult<Dispatched> {
        let nonce = self.chain.next_nonce(self.wallet.address()).await?;
        let gas_price = match request.gas_price {
            Some(price) => price,
            None => self.oracle.price(self.level).await,
        };
        self.broadcast(request, nonce, gas_price).await
    }

    async fn resubmit(
        &self,
        request: TransactionRequest,
        nonce: u64,
        gas_price: U256,
    ) -> ToolResult<Dispatched> {
        self.broadcast(request, nonce, gas_price).await
    }

    async fn confirmed_nonce(&self) -> ToolResult<u64> {
        self.chain.confirmed_nonce(self.wallet.address()).await
    }

    fn address(&self) -> Address {
        self.wallet.address()
    }

    fn persistent(&self) -> bool {
        self.persistent
    }
}
