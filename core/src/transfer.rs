use alloy::{
    primitives::{Address, Bytes, U256, utils::parse_units},
    sol,
    sol_types::SolCall,
};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

sol! {
    /// Minimal ERC-20 surface used by the sender.
    interface IErc20 {
        function transfer(address to, uint256 value) external returns (bool);
    }
}

/// Calldata for `transfer(to, value)` on an ERC-20 token contract.
pub fn erc20_transfer_calldata(to: Address, value: U256) -> Bytes {
    IErc20::transferCall { to, value }.abi_encode().into()
}

/// A fee recommendation, tagged with the pricing model it was computed
/// under. Quotes are recomputed for every send attempt and never cached;
/// base fees drift too quickly for a cached quote to stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeeQuote {
    /// Pre-EIP-1559 single gas price, in wei.
    Legacy { gas_price: u128 },
    /// EIP-1559 two-part pricing, in wei.
    DynamicFee {
        max_priority_fee_per_gas: u128,
        max_fee_per_gas: u128,
    },
}

impl FeeQuote {
    /// The value a miner effectively compares against when deciding whether
    /// a replacement pays enough: the total cap for dynamic fees, the price
    /// itself for legacy.
    pub fn price_ceiling(&self) -> u128 {
        match self {
            FeeQuote::Legacy { gas_price } => *gas_price,
            FeeQuote::DynamicFee {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// Parse a human decimal token amount ("1.5") into base units.
pub fn parse_token_amount(amount: &str, decimals: u8) -> Result<U256, EngineError> {
    let parsed = parse_units(amount, decimals).map_err(|e| EngineError::ValidationError {
        message: format!("invalid amount {amount:?}: {e}"),
    })?;

    let value: U256 = parsed.get_absolute();
    if amount.trim_start().starts_with('-') || value.is_zero() {
        return Err(EngineError::ValidationError {
            message: format!("amount must be positive, got {amount:?}"),
        });
    }

    Ok(value)
}
