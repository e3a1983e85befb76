//! Precise Unit Math
//!
//! 18-decimal fixed-point arithmetic over 256-bit integers, signed and unsigned.
//!
//! ROUNDING:
//! - `precise_mul` / `precise_div` truncate (toward zero)
//! - `precise_mul_ceil` / `precise_div_ceil` round the magnitude up
//! - `precise_mul_floor` / `precise_div_floor` round toward negative infinity
//!
//! Deposits are priced with the ceiling variants and withdrawals with the
//! floor variants so rounding always lands in the basket's favour. Every step
//! is checked; nothing here wraps.

use alloy_primitives::{I256, U256};

use crate::error::ArithmeticError;

// ============================================
// CONSTANTS
// ============================================

/// 10^18
pub const PRECISE_UNIT: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Number of decimals carried by a precise unit
pub const PRECISE_DECIMALS: u8 = 18;

/// 10^18 as a signed value
pub fn precise_unit_int() -> I256 {
    I256::from_raw(PRECISE_UNIT)
}

type MathResult<T> = Result<T, ArithmeticError>;

// ============================================
// SHARED OPERATIONS
// ============================================

/// Fixed-point operations available for both signednesses
pub trait PreciseUnitMath: Sized + Copy {
    /// a * b / 10^18, truncated toward zero
    fn precise_mul(self, b: Self) -> MathResult<Self>;

    /// a * 10^18 / b, truncated toward zero
    fn precise_div(self, b: Self) -> MathResult<Self>;

    /// a * 10^18 / b with the magnitude rounded up
    fn precise_div_ceil(self, b: Self) -> MathResult<Self>;
}

// ============================================
// UNSIGNED
// ============================================

fn mul_u(a: U256, b: U256) -> MathResult<U256> {
    a.checked_mul(b).ok_or(ArithmeticError::Overflow)
}

impl PreciseUnitMath for U256 {
    fn precise_mul(self, b: U256) -> MathResult<U256> {
        Ok(mul_u(self, b)? / PRECISE_UNIT)
    }

    fn precise_div(self, b: U256) -> MathResult<U256> {
        if b.is_zero() {
            return Err(ArithmeticError::DivideByZero);
        }
        Ok(mul_u(self, PRECISE_UNIT)? / b)
    }

    fn precise_div_ceil(self, b: U256) -> MathResult<U256> {
        if b.is_zero() {
            return Err(ArithmeticError::DivideByZero);
        }
        if self.is_zero() {
            return Ok(U256::ZERO);
        }
        // numerator >= 10^18 here, so neither the -1 nor the +1 can wrap
        Ok((mul_u(self, PRECISE_UNIT)? - U256::from(1)) / b + U256::from(1))
    }
}

/// Unsigned-only helpers
pub trait UnsignedPreciseMath: Sized {
    /// a * b / 10^18 rounded up; zero when the product is zero
    fn precise_mul_ceil(self, b: Self) -> MathResult<Self>;

    /// |a - b| <= range
    fn approximately_equals(self, b: Self, range: Self) -> bool;
}

impl UnsignedPreciseMath for U256 {
    fn precise_mul_ceil(self, b: U256) -> MathResult<U256> {
        if self.is_zero() || b.is_zero() {
            return Ok(U256::ZERO);
        }
        Ok((mul_u(self, b)? - U256::from(1)) / PRECISE_UNIT + U256::from(1))
    }

    fn approximately_equals(self, b: U256, range: U256) -> bool {
        let diff = if self >= b { self - b } else { b - self };
        diff <= range
    }
}

/// base^exp with every intermediate product checked
pub fn safe_power(base: U256, exp: u32) -> MathResult<U256> {
    let mut result = U256::from(1);
    for _ in 0..exp {
        result = mul_u(result, base)?;
    }
    Ok(result)
}

// ============================================
// SIGNED
// ============================================

fn mul_i(a: I256, b: I256) -> MathResult<I256> {
    a.checked_mul(b).ok_or(if a.is_negative() != b.is_negative() {
        ArithmeticError::Underflow
    } else {
        ArithmeticError::Overflow
    })
}

fn div_i(a: I256, b: I256) -> MathResult<I256> {
    if b.is_zero() {
        return Err(ArithmeticError::DivideByZero);
    }
    // MIN / -1 is the only other failure
    a.checked_div(b).ok_or(ArithmeticError::Overflow)
}

fn rem_is_zero(a: I256, b: I256) -> MathResult<bool> {
    if b.is_zero() {
        return Err(ArithmeticError::DivideByZero);
    }
    Ok(a.checked_rem(b).map(|r| r.is_zero()).unwrap_or(true))
}

/// Integer division rounded toward negative infinity
pub fn div_down(a: I256, b: I256) -> MathResult<I256> {
    let result = div_i(a, b)?;
    if a.is_negative() != b.is_negative() && !rem_is_zero(a, b)? {
        return result
            .checked_sub(I256::ONE)
            .ok_or(ArithmeticError::Underflow);
    }
    Ok(result)
}

impl PreciseUnitMath for I256 {
    fn precise_mul(self, b: I256) -> MathResult<I256> {
        div_i(mul_i(self, b)?, precise_unit_int())
    }

    fn precise_div(self, b: I256) -> MathResult<I256> {
        if b.is_zero() {
            return Err(ArithmeticError::DivideByZero);
        }
        div_i(mul_i(self, precise_unit_int())?, b)
    }

    fn precise_div_ceil(self, b: I256) -> MathResult<I256> {
        if b.is_zero() {
            return Err(ArithmeticError::DivideByZero);
        }
        let numerator = mul_i(self, precise_unit_int())?;
        let quotient = div_i(numerator, b)?;
        if rem_is_zero(numerator, b)? {
            return Ok(quotient);
        }
        // a nonzero remainder implies a nonzero numerator, so the signs are meaningful
        if numerator.is_negative() == b.is_negative() {
            quotient.checked_add(I256::ONE).ok_or(ArithmeticError::Overflow)
        } else {
            quotient.checked_sub(I256::ONE).ok_or(ArithmeticError::Underflow)
        }
    }
}

/// Signed-only helpers
pub trait SignedPreciseMath: Sized {
    /// a * b / 10^18 rounded toward negative infinity
    fn precise_mul_floor(self, b: Self) -> MathResult<Self>;

    /// a * 10^18 / b rounded toward negative infinity
    fn precise_div_floor(self, b: Self) -> MathResult<Self>;

    fn checked_abs_value(self) -> MathResult<Self>;

    fn checked_negate(self) -> MathResult<Self>;
}

impl SignedPreciseMath for I256 {
    fn precise_mul_floor(self, b: I256) -> MathResult<I256> {
        div_down(mul_i(self, b)?, precise_unit_int())
    }

    fn precise_div_floor(self, b: I256) -> MathResult<I256> {
        if b.is_zero() {
            return Err(ArithmeticError::DivideByZero);
        }
        div_down(mul_i(self, precise_unit_int())?, b)
    }

    fn checked_abs_value(self) -> MathResult<I256> {
        self.checked_abs().ok_or(ArithmeticError::Overflow)
    }

    fn checked_negate(self) -> MathResult<I256> {
        self.checked_neg().ok_or(ArithmeticError::Overflow)
    }
}
