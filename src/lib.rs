//! Matrix - position accounting for tokenized basket tokens
//!
//! A basket ("Matrix") token is backed by a weighted set of component
//! positions. This crate carries the accounting engine underneath it:
//!
//! - `math`: 18-decimal fixed-point arithmetic, checked end to end
//! - `ledger`: per-token positions, the position multiplier, supply
//! - `modules`: streaming fees, direct issuance, NAV issuance
//! - `external`: authorization, valuation and balance boundaries
//! - `scenario`: scripted lifecycles for the `matrix` binary

pub mod config;
pub mod error;
pub mod external;
pub mod ledger;
pub mod math;
pub mod modules;
pub mod scenario;

pub use error::{ArithmeticError, ErrorKind, MatrixError, MatrixResult};
pub use ledger::{MatrixStore, MatrixToken};
