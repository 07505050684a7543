//! Decimal-aware amount formatting and parsing.
//!
//! Token amounts are rendered against the token's on-chain `decimals` value
//! (0-255), never an assumed 18. Output keeps at least one fractional digit
//! with trailing zeros trimmed, matching the display contract of the wallet
//! SDK's `formatUnits`.

use crate::error::{ToolError, ToolResult};
use ethers::types::U256;

/// Render a raw integer amount at the given decimal scale.
///
/// `1000000` at 6 decimals becomes `"1.0"`, `2500000` becomes `"2.5"`.
pub fn format_scaled(amount: U256, decimals: u8) -> String {
    let digits = amount.to_string();
    if decimals == 0 {
        return format!("{digits}.0");
    }

    let places = decimals as usize;
    let (int_part, frac_part) = if digits.len() > places {
        let (int_part, frac_part) = digits.split_at(digits.len() - places);
        (int_part.to_string(), frac_part.to_string())
    } else {
        ("0".to_string(), format!("{digits:0>places$}"))
    };

    let frac = frac_part.trim_end_matches('0');
    if frac.is_empty() {
        format!("{int_part}.0")
    } else {
        format!("{int_part}.{frac}")
    }
}

/// Parse a human-entered decimal amount into a raw integer at the given
/// decimal scale.
///
/// Fails fast on anything that is not a plain non-negative decimal, and on
/// more fractional digits than the token supports.
pub fn parse_scaled(text: &str, decimals: u8) -> ToolResult<U256> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ToolError::InvalidAmount("empty amount".to_string()));
    }

    let (int_part, frac_part) = match text.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (text, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(ToolError::InvalidAmount(format!("not a number: {text:?}")));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ToolError::InvalidAmount(format!("not a number: {text:?}")));
    }
    if frac_part.len() > decimals as usize {
        return Err(ToolError::InvalidAmount(format!(
            "{text:?} has more than {decimals} decimal places"
        )));
    }

    let mut digits = String::with_capacity(int_part.len() + decimals as usize);
    digits.push_str(if int_part.is_empty() { "0" } else { int_part });
    digits.push_str(frac_part);
    for _ in frac_part.len()..decimals as usize {
        digits.push('0');
    }

    U256::from_dec_str(&digits)
        .map_err(|_| ToolError::InvalidAmount(format!("amount out of range: {text:?}")))
}
