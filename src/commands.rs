//! Command implementations
//!
//! Stateless request/response operations: each invokes one capability on a
//! collaborator, formats the result against the token's declared decimal
//! precision, and returns the line to print.

use crate::chain::ChainClient;
use crate::erc20::TokenOps;
use crate::error::{ToolError, ToolResult};
use crate::units::{format_scaled, parse_scaled};

use ethers::types::Address;

const ETHER_DECIMALS: u8 = 18;

/// `balance-of` - ether balance of an address.
pub async fn balance_of(chain: &ChainClient, who: Address) -> ToolResult<String> {
    let wei = chain.get_balance(who).await?;
    Ok(format_scaled(wei, ETHER_DECIMALS))
}

/// `balance-of-token` - token balance of an address.
pub async fn balance_of_token(token: &dyn TokenOps, who: Address) -> ToolResult<String> {
    let decimals = token.decimals().await?;
    let raw = token.balance_of(who).await?;
    Ok(format_scaled(raw, decimals))
}

/// `decimals` - a token's decimal precision.
pub async fn decimals(token: &dyn TokenOps) -> ToolResult<String> {
    Ok(token.decimals().await?.to_string())
}

/// `total-supply` - a token's total supply.
pub async fn total_supply(token: &dyn TokenOps) -> ToolResult<String> {
    let decimals = token.decimals().await?;
    let raw = token.total_supply().await?;
    Ok(format_scaled(raw, decimals))
}

/// `transfer` - send tokens to a target address.
pub async fn transfer(token: &dyn TokenOps, to: Address, amount: &str) -> ToolResult<String> {
    let decimals = token.decimals().await?;
    let raw = parse_scaled(amount, decimals)?;
    let dispatched = token.transfer(to, raw).await?;
    Ok(format!("{:?}", dispatched.hash))
}

/// `approve` - let a spender move tokens on the owner's behalf.
///
/// The owner argument must be the active account; approvals can only be
/// granted by the key that signs them.
pub async fn approve(
    token: &dyn TokenOps,
    owner: Address,
    spender: Address,
    amount: &str,
    account: Address,
) -> ToolResult<String> {
    if owner != account {
        return Err(ToolError::InvalidArgument(format!(
            "approvals must come from the active account {account:?}, not {owner:?}"
        )));
    }
    let decimals = token.decimals().await?;
    let raw = parse_scaled(amount, decimals)?;
    let dispatched = token.approve(spender, raw).await?;
    Ok(format!("{:?}", dispatched.hash))
}

/// `mint` - mint tokens to a target address.
pub async fn mint(token: &dyn TokenOps, to: Address, amount: &str) -> ToolResult<String> {
    let decimals = token.decimals().await?;
    let raw = parse_scaled(amount, decimals)?;
    let dispatched = token.mint(to, raw).await?;
    Ok(format!("{:?}", dispatched.hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erc20::MockTokenOps;
    use crate::tx::Dispatched;
    use ethers::types::{H256, U256};

    fn token_with_decimals(decimals: u8) -> MockTokenOps {
        let mut token = MockTokenOps::new();
        token.expect_decimals().returning(move || Ok(decimals));
        token
    }

    fn dispatched(hash: H256) -> Dispatched {
        Dispatched {
            nonce: 0,
            hash,
            gas_price: U256::from(1_000_000_000u64),
        }
    }

    #[tokio::test]
    async fn decimals_prints_the_raw_value() {
        let token = token_with_decimals(6);
        assert_eq!(decimals(&token).await.unwrap(), "6");
    }

    #[tokio::test]
    async fn total_supply_respects_token_decimals() {
        let mut token = token_with_decimals(6);
        token
            .expect_total_supply()
            .returning(|| Ok(U256::from(1_000_000u64)));
        assert_eq!(total_supply(&token).await.unwrap(), "1.0");
    }

    #[tokio::test]
    async fn token_balance_respects_token_decimals() {
        let mut token = token_with_decimals(6);
        token
            .expect_balance_of()
            .returning(|_| Ok(U256::from(2_500_000u64)));
        let who = Address::repeat_byte(0xaa);
        assert_eq!(balance_of_token(&token, who).await.unwrap(), "2.5");
    }

    #[tokio::test]
    async fn transfer_scales_the_amount_and_prints_the_hash() {
        let hash = H256::from_low_u64_be(0x42);
        let mut token = token_with_decimals(6);
        token
            .expect_transfer()
            .withf(|_, amount| *amount == U256::from(1_500_000u64))
            .times(1)
            .returning(move |_, _| Ok(dispatched(hash)));

        let out = transfer(&token, Address::repeat_byte(0xbb), "1.5")
            .await
            .unwrap();
        assert_eq!(out, format!("{hash:?}"));
    }

    #[tokio::test]
    async fn transfer_rejects_bad_amounts_before_any_call() {
        let mut token = token_with_decimals(6);
        token.expect_transfer().never();

        let err = transfer(&token, Address::repeat_byte(0xbb), "one")
            .await
            .unwrap_err();
        assert!(err.is_input());
    }

    #[tokio::test]
    async fn approve_requires_the_active_account_as_owner() {
        let mut token = token_with_decimals(6);
        token.expect_approve().never();

        let owner = Address::repeat_byte(0xaa);
        let account = Address::repeat_byte(0x11);
        let err = approve(&token, owner, Address::repeat_byte(0xbb), "1", account)
            .await
            .unwrap_err();
        assert!(err.is_input());
    }

    #[tokio::test]
    async fn approve_submits_for_the_active_account() {
        let hash = H256::from_low_u64_be(0x43);
        let account = Address::repeat_byte(0x11);
        let spender = Address::repeat_byte(0xbb);
        let mut token = token_with_decimals(0);
        token
            .expect_approve()
            .withf(move |to, amount| *to == spender && *amount == U256::from(5u64))
            .times(1)
            .returning(move |_, _| Ok(dispatched(hash)));

        let out = approve(&token, account, spender, "5", account).await.unwrap();
        assert_eq!(out, format!("{hash:?}"));
    }

    #[tokio::test]
    async fn mint_scales_against_zero_decimal_tokens() {
        let hash = H256::from_low_u64_be(0x44);
        let mut token = token_with_decimals(0);
        token
            .expect_mint()
            .withf(|_, amount| *amount == U256::from(5u64))
            .times(1)
            .returning(move |_, _| Ok(dispatched(hash)));

        let out = mint(&token, Address::repeat_byte(0xbb), "5").await.unwrap();
        assert_eq!(out, format!("{hash:?}"));
    }
}
