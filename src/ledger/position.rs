//! Position types and position-unit helpers
//!
//! Units stored on the ledger are VIRTUAL units. The claim per unit of current
//! supply (the REAL unit) is `virtual * positionMultiplier / 10^18`.

use alloy_primitives::{Address, Bytes, I256, U256};
use serde::Serialize;
use std::collections::HashMap;

use super::address_set::AddressSet;
use crate::error::{MatrixError, MatrixResult};
use crate::math::PreciseUnitMath;

// ============================================
// TYPES
// ============================================

/// Whether a flattened position is the pro-rata claim or module-attributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PositionState {
    Default,
    External,
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionState::Default => write!(f, "default"),
            PositionState::External => write!(f, "external"),
        }
    }
}

/// Flattened view of one position, in REAL units
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub component: Address,
    /// `Address::ZERO` for default positions
    pub module: Address,
    pub unit: I256,
    pub state: PositionState,
    pub data: Bytes,
}

/// Module-attributed claim on a component
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalPosition {
    pub virtual_unit: I256,
    pub data: Bytes,
}

/// Everything the ledger tracks for one component
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentPosition {
    pub virtual_unit: I256,
    pub external_modules: AddressSet,
    pub external_positions: HashMap<Address, ExternalPosition>,
}

impl ComponentPosition {
    pub fn has_external_positions(&self) -> bool {
        !self.external_modules.is_empty()
    }

    /// Nothing left to track; the component must be pruned
    pub fn is_empty(&self) -> bool {
        self.virtual_unit.is_zero() && !self.has_external_positions()
    }

    pub fn external_virtual_unit(&self, module: &Address) -> I256 {
        self.external_positions
            .get(module)
            .map(|p| p.virtual_unit)
            .unwrap_or(I256::ZERO)
    }
}

// ============================================
// POSITION MATH
// ============================================

/// Total notional held for a default unit: supply * unit / 10^18
pub fn get_default_total_notional(total_supply: U256, position_unit: U256) -> MatrixResult<U256> {
    Ok(total_supply.precise_mul(position_unit)?)
}

/// New default real unit after a component balance changed outside of
/// position edits.
///
/// Any amount held above `pre_position_unit * supply` before the action
/// (airdrops, direct transfers) is excluded from the new unit:
/// `(post - (pre - unit * supply)) / supply`.
///
/// When the balance did not move the existing unit is returned untouched, so
/// repeated calls against an unchanged balance are idempotent.
pub fn calculate_default_edit_position_unit(
    total_supply: U256,
    pre_total_notional: U256,
    post_total_notional: U256,
    pre_position_unit: U256,
) -> MatrixResult<U256> {
    if post_total_notional == pre_total_notional {
        return Ok(pre_position_unit);
    }
    if total_supply.is_zero() {
        return Err(MatrixError::invalid("cannot resize positions of a zero-supply token"));
    }

    let tracked = pre_position_unit.precise_mul(total_supply)?;
    let untracked = pre_total_notional.checked_sub(tracked).ok_or_else(|| {
        MatrixError::invalid("tracked notional exceeds the pre-action balance")
    })?;
    let post_tracked = post_total_notional.checked_sub(untracked).ok_or_else(|| {
        MatrixError::invalid("post-action balance is below the untracked amount")
    })?;

    Ok(post_tracked.precise_div(total_supply)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::math::PRECISE_UNIT;

    fn e18(n: u64) -> U256 {
        U256::from(n) * PRECISE_UNIT
    }

    #[test]
    fn test_default_total_notional() {
        // 10 tokens outstanding at 2.5 per token
        let unit = U256::from(2_500_000_000_000_000_000u64);
        assert_eq!(get_default_total_notional(e18(10), unit).unwrap(), e18(25));
    }

    #[test]
    fn test_edit_unit_excludes_airdrop() {
        // supply 10, unit 1 -> 10 tracked; 2 airdropped; trade sells 5
        let supply = e18(10);
        let unit = e18(1);
        let new_unit = calculate_default_edit_position_unit(supply, e18(12), e18(7), unit).unwrap();
        assert_eq!(new_unit, U256::from(500_000_000_000_000_000u64));
    }

    #[test]
    fn test_edit_unit_is_idempotent_on_unchanged_balance() {
        let supply = U256::from(3);
        let unit = U256::from(333_333_333_333_333_333u64);
        let first = calculate_default_edit_position_unit(supply, e18(1), e18(1), unit).unwrap();
        let second = calculate_default_edit_position_unit(supply, e18(1), e18(1), first).unwrap();
        assert_eq!(first, unit);
        assert_eq!(second, first);
    }

    #[test]
    fn test_edit_unit_rejects_inconsistent_balances() {
        let err = calculate_default_edit_position_unit(e18(10), e18(5), e18(6), e18(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_component_position_emptiness() {
        let mut position = ComponentPosition::default();
        assert!(position.is_empty());

        position.external_modules.insert(Address::with_last_byte(9));
        assert!(!position.is_empty());
        assert_eq!(position.external_virtual_unit(&Address::with_last_byte(9)), I256::ZERO);
    }
}
