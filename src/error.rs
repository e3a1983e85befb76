//! Error taxonomy for the Matrix accounting core
//!
//! Every failure aborts the whole composite operation. Nothing in the core
//! retries; callers branch on [`ErrorKind`] to decide what to do next.

use alloy_primitives::{Address, U256};
use thiserror::Error;

/// Fixed-width integer failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArithmeticError {
    #[error("arithmetic overflow")]
    Overflow,

    #[error("arithmetic underflow")]
    Underflow,

    #[error("division by zero")]
    DivideByZero,
}

/// Coarse error classification callers can match on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Arithmetic,
    InvalidParameter,
    Unauthorized,
    InsufficientBalance,
    ValuationUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("caller {caller} is not an authorized module or manager")]
    Unauthorized { caller: Address },

    #[error("insufficient balance of {asset}: required {required}, available {available}")]
    InsufficientBalance {
        asset: Address,
        required: U256,
        available: U256,
    },

    #[error("valuation unavailable: {0}")]
    ValuationUnavailable(String),
}

impl MatrixError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        MatrixError::InvalidParameter(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MatrixError::Arithmetic(_) => ErrorKind::Arithmetic,
            MatrixError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            MatrixError::Unauthorized { .. } => ErrorKind::Unauthorized,
            MatrixError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            MatrixError::ValuationUnavailable(_) => ErrorKind::ValuationUnavailable,
        }
    }
}

pub type MatrixResult<T> = Result<T, MatrixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinguishable() {
        let unauthorized = MatrixError::Unauthorized { caller: Address::ZERO };
        let short = MatrixError::InsufficientBalance {
            asset: Address::ZERO,
            required: U256::from(2),
            available: U256::from(1),
        };

        assert_eq!(unauthorized.kind(), ErrorKind::Unauthorized);
        assert_eq!(short.kind(), ErrorKind::InsufficientBalance);
        assert_ne!(unauthorized.kind(), short.kind());
    }

    #[test]
    fn test_arithmetic_converts() {
        let err: MatrixError = ArithmeticError::DivideByZero.into();
        assert_eq!(err.kind(), ErrorKind::Arithmetic);
        assert_eq!(err.to_string(), "division by zero");
    }
}
