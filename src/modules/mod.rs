//! Modules that drive a basket token's ledger
//!
//! Each module is a small stateless handle (its own address plus the protocol
//! fee terms that apply to it). Per-token module state lives on the
//! [`MatrixToken`] itself, so a module can serve any number of basket tokens.

pub mod issuance;
pub mod nav_issuance;
pub mod streaming_fee;

pub use issuance::{ComponentIssuanceUnits, IssuanceModule, IssuanceReceipt, IssuanceSettings};
pub use nav_issuance::{
    NavIssuanceModule, NavIssuanceSettings, NavIssueReceipt, NavRedeemReceipt,
};
pub use streaming_fee::{
    calculate_accrued_fee, calculate_inflation_amount, calculate_new_multiplier, FeeAccrual,
    FeeState, StreamingFeeModule, SECONDS_PER_YEAR,
};

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::{MatrixError, MatrixResult};
use crate::ledger::{MatrixToken, ModuleState};
use crate::math::PRECISE_UNIT;

/// Protocol-level fee terms every module reads from
///
/// All percentages are 18-decimal precise values (1e16 = 1%).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolFeeSchedule {
    pub fee_recipient: Address,
    /// Share of every streaming fee mint that goes to the protocol
    pub streaming_fee_split: U256,
    /// Share of direct issuance manager fees that goes to the protocol
    pub issuance_fee_split: U256,
    pub nav_issue_direct_fee: U256,
    pub nav_redeem_direct_fee: U256,
    /// Share of the NAV manager fee taken by the protocol
    pub nav_issue_manager_revenue_share: U256,
    pub nav_redeem_manager_revenue_share: U256,
}

impl Default for ProtocolFeeSchedule {
    fn default() -> Self {
        Self {
            fee_recipient: Address::ZERO,
            streaming_fee_split: U256::ZERO,
            issuance_fee_split: U256::ZERO,
            nav_issue_direct_fee: U256::ZERO,
            nav_redeem_direct_fee: U256::ZERO,
            nav_issue_manager_revenue_share: U256::ZERO,
            nav_redeem_manager_revenue_share: U256::ZERO,
        }
    }
}

impl ProtocolFeeSchedule {
    pub fn validate(&self) -> MatrixResult<()> {
        let percentages = [
            ("streaming_fee_split", self.streaming_fee_split),
            ("issuance_fee_split", self.issuance_fee_split),
            ("nav_issue_direct_fee", self.nav_issue_direct_fee),
            ("nav_redeem_direct_fee", self.nav_redeem_direct_fee),
            ("nav_issue_manager_revenue_share", self.nav_issue_manager_revenue_share),
            ("nav_redeem_manager_revenue_share", self.nav_redeem_manager_revenue_share),
        ];

        for (name, value) in percentages {
            ensure_below_one(name, value)?;
        }

        let takes_fees = percentages.iter().any(|(_, value)| !value.is_zero());
        if takes_fees && self.fee_recipient == Address::ZERO {
            return Err(MatrixError::invalid("protocol fees require a fee recipient"));
        }

        Ok(())
    }
}

/// Percentages must stay strictly below 100%
pub(crate) fn ensure_below_one(name: &str, value: U256) -> MatrixResult<()> {
    if value >= PRECISE_UNIT {
        return Err(MatrixError::invalid(format!("{} must be less than 100%", name)));
    }
    Ok(())
}

pub(crate) fn ensure_pending(token: &MatrixToken, module: Address) -> MatrixResult<()> {
    if token.module_state(&module) != Some(ModuleState::Pending) {
        return Err(MatrixError::invalid(format!(
            "module {} is not pending on {}",
            module,
            token.symbol()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_fee_schedule_validation() {
        assert!(ProtocolFeeSchedule::default().validate().is_ok());

        let missing_recipient = ProtocolFeeSchedule {
            streaming_fee_split: U256::from(1),
            ..Default::default()
        };
        assert_eq!(
            missing_recipient.validate().unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );

        let full = ProtocolFeeSchedule {
            fee_recipient: Address::with_last_byte(1),
            nav_issue_direct_fee: PRECISE_UNIT,
            ..Default::default()
        };
        assert!(full.validate().is_err());
    }
}
