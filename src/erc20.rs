//! ERC-20 bindings and the token capability used by the command layer
//!
//! Reads go straight to the contract; writes extract the prepared calldata
//! and route through the managed signer so they participate in redispatch.

use crate::chain::ChainClient;
use crate::error::{ToolError, ToolResult};
use crate::tx::{Dispatched, ManagedSigner};

use async_trait::async_trait;
use ethers::contract::{ContractCall, ContractError};
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;

abigen!(
    Erc20,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function transfer(address to, uint256 amount) external returns (bool)
        function approve(address spender, uint256 amount) external returns (bool)
        function mint(address to, uint256 amount) external returns (bool)
        function decimals() external view returns (uint8)
        function totalSupply() external view returns (uint256)
    ]"#
);

/// Token operations the commands run against.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenOps: Send + Sync {
    async fn balance_of(&self, owner: Address) -> ToolResult<U256>;
    async fn decimals(&self) -> ToolResult<u8>;
    async fn total_supply(&self) -> ToolResult<U256>;
    async fn transfer(&self, to: Address, amount: U256) -> ToolResult<Dispatched>;
    async fn approve(&self, spender: Address, amount: U256) -> ToolResult<Dispatched>;
    async fn mint(&self, to: Address, amount: U256) -> ToolResult<Dispatched>;
}

/// Live token bound to one contract address.
pub struct TokenClient {
    contract: Erc20<Provider<Http>>,
    signer: Option<Arc<ManagedSigner>>,
}

impl TokenClient {
    /// A client for view calls only.
    pub fn read_only(address: Address, chain: &ChainClient) -> Self {
        Self {
            contract: Erc20::new(address, Arc::new(chain.http().clone())),
            signer: None,
        }
    }

    /// A client whose write calls go through the managed signer.
    pub fn with_signer(address: Address, chain: &ChainClient, signer: Arc<ManagedSigner>) -> Self {
        Self {
            contract: Erc20::new(address, Arc::new(chain.http().clone())),
            signer: Some(signer),
        }
    }

    fn signer(&self) -> ToolResult<&Arc<ManagedSigner>> {
        self.signer
            .as_ref()
            .ok_or_else(|| ToolError::Wallet("command requires a configured account".to_string()))
    }

    async fn send_call<D>(&self, call: ContractCall<Provider<Http>, D>) -> ToolResult<Dispatched> {
        let request = legacy_request(call.tx);
        self.signer()?.send_transaction(request).await
    }
}

/// Flatten a prepared contract call into the legacy request shape the
/// redispatcher works with; the gas price is assigned at submission time.
fn legacy_request(tx: TypedTransaction) -> TransactionRequest {
    match tx {
        TypedTransaction::Legacy(request) => request,
        TypedTransaction::Eip2930(inner) => inner.tx,
        TypedTransaction::Eip1559(request) => {
            let mut out = TransactionRequest::new();
            out.from = request.from;
            out.to = request.to;
            out.gas = request.gas;
            out.value = request.value;
            out.data = request.data;
            out.nonce = request.nonce;
            out.chain_id = request.chain_id;
            out
        }
    }
}

fn contract_err(e: ContractError<Provider<Http>>) -> ToolError {
    ToolError::Contract(e.to_string())
}

#[async_trait]
impl TokenOps for TokenClient {
    async fn balance_of(&self, owner: Address) -> ToolResult<U256> {
        self.contract
            .balance_of(owner)
            .call()
            .await
            .map_err(contract_err)
    }

    async fn decimals(&self) -> ToolResult<u8> {
        self.contract.decimals().call().await.map_err(contract_err)
    }

    async fn total_supply(&self) -> ToolResult<U256> {
        self.contract
            .total_supply()
            .call()
            .await
            .map_err(contract_err)
    }

    async fn transfer(&self, to: Address, amount: U256) -> ToolResult<Dispatched> {
        self.send_call(self.contract.transfer(to, amount)).await
    }

    async fn approve(&self, spender: Address, amount: U256) -> ToolResult<Dispatched> {
        self.send_call(self.contract.approve(spender, amount)).await
    }

    async fn mint(&self, to: Address, amount: U256) -> ToolResult<Dispatched> {
        self.send_call(self.contract.mint(to, amount)).await
    }
}
