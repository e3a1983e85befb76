//! Position ledger
//!
//! Responsible for:
//! - Per-basket-token position state (default + external, virtual units)
//! - Real/virtual conversion through the position multiplier
//! - Component pruning and the ordered component set
//! - The shared registry giving single-writer access per token

mod address_set;
mod matrix_token;
mod position;
mod store;

pub use address_set::AddressSet;
pub use matrix_token::{MatrixSnapshot, MatrixToken, ModuleState};
pub(crate) use matrix_token::ModuleSlot;
pub use position::{
    calculate_default_edit_position_unit, get_default_total_notional, ComponentPosition,
    ExternalPosition, Position, PositionState,
};
pub use store::MatrixStore;
