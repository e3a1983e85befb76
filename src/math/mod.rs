//! Fixed-point math
//!
//! Responsible for:
//! - 18-decimal precise-unit arithmetic (signed and unsigned)
//! - Rescaling between precise units and native token decimals
//! - Checked casts between the two signednesses

mod precise_unit;
mod unit_conversion;

pub use precise_unit::{
    div_down, precise_unit_int, safe_power, PreciseUnitMath, SignedPreciseMath,
    UnsignedPreciseMath, PRECISE_DECIMALS, PRECISE_UNIT,
};
pub use unit_conversion::{
    from_precise_unit_to_decimals, from_precise_unit_to_decimals_int,
    to_precise_units_from_decimals, to_precise_units_from_decimals_int,
};

use alloy_primitives::{I256, U256};

use crate::error::ArithmeticError;

/// U256 -> I256, failing when the value exceeds I256::MAX
pub fn to_int256(value: U256) -> Result<I256, ArithmeticError> {
    I256::try_from(value).map_err(|_| ArithmeticError::Overflow)
}

/// I256 -> U256, failing on negative values
pub fn to_uint256(value: I256) -> Result<U256, ArithmeticError> {
    if value.is_negative() {
        return Err(ArithmeticError::Underflow);
    }
    Ok(value.into_raw())
}
