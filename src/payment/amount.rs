//! Human amount to smallest-unit conversion.

use crate::error::{Error, Result};
use alloy::primitives::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Scale a human-denominated amount into the asset's smallest unit.
///
/// The multiplication is exact decimal arithmetic and the result is rounded
/// half away from zero, so `0.01` at 6 decimals is always `10000`.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the amount is not positive, overflows, or
/// rounds to zero units.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<U256> {
    if amount <= Decimal::ZERO {
        return Err(Error::Validation(format!(
            "Amount must be positive, got {amount}"
        )));
    }

    let scale = 10u64
        .checked_pow(decimals)
        .map(Decimal::from)
        .ok_or_else(|| Error::Validation(format!("Unsupported decimals: {decimals}")))?;

    let units = amount
        .checked_mul(scale)
        .ok_or_else(|| Error::Validation(format!("Amount {amount} overflows")))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u128()
        .ok_or_else(|| Error::Validation(format!("Amount {amount} is not representable")))?;

    if units == 0 {
        return Err(Error::Validation(format!(
            "Amount {amount} is below the smallest unit"
        )));
    }

    Ok(U256::from(units))
}
