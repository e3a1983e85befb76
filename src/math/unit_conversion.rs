//! Decimal rescaling between precise units (18 decimals) and native token decimals

use alloy_primitives::{I256, U256};

use super::precise_unit::{safe_power, PRECISE_DECIMALS};
use crate::error::{ArithmeticError, MatrixError, MatrixResult};

/// 10^(18 - decimals); decimals above 18 are rejected
fn scale_factor(decimals: u8) -> MatrixResult<U256> {
    if decimals > PRECISE_DECIMALS {
        return Err(MatrixError::invalid(format!(
            "token decimals {} exceed {}",
            decimals, PRECISE_DECIMALS
        )));
    }
    Ok(safe_power(U256::from(10), u32::from(PRECISE_DECIMALS - decimals))?)
}

fn scale_factor_int(decimals: u8) -> MatrixResult<I256> {
    // at most 10^18, always representable
    Ok(I256::from_raw(scale_factor(decimals)?))
}

/// 18-decimal amount -> native decimals (truncates)
pub fn from_precise_unit_to_decimals(amount: U256, decimals: u8) -> MatrixResult<U256> {
    Ok(amount / scale_factor(decimals)?)
}

/// Signed variant; truncates toward zero
pub fn from_precise_unit_to_decimals_int(amount: I256, decimals: u8) -> MatrixResult<I256> {
    amount
        .checked_div(scale_factor_int(decimals)?)
        .ok_or(MatrixError::Arithmetic(ArithmeticError::Overflow))
}

/// Native decimals -> 18-decimal amount
pub fn to_precise_units_from_decimals(amount: U256, decimals: u8) -> MatrixResult<U256> {
    amount
        .checked_mul(scale_factor(decimals)?)
        .ok_or(MatrixError::Arithmetic(ArithmeticError::Overflow))
}

pub fn to_precise_units_from_decimals_int(amount: I256, decimals: u8) -> MatrixResult<I256> {
    amount.checked_mul(scale_factor_int(decimals)?).ok_or_else(|| {
        MatrixError::Arithmetic(if amount.is_negative() {
            ArithmeticError::Underflow
        } else {
            ArithmeticError::Overflow
        })
    })
}
