//! Streaming Fee Module
//!
//! Charges a continuously accruing fee against basket-token supply by minting
//! new supply to the fee recipients and diluting the position multiplier.
//!
//! ACCRUAL:
//! fee% = rate * elapsed / SECONDS_PER_YEAR
//! mint = fee% * supply / (1 - fee%)      (fee charged on post-mint supply)
//! multiplier' = multiplier * (1 - fee%)

use alloy_primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ensure_below_one, ensure_pending, ProtocolFeeSchedule};
use crate::error::{ArithmeticError, MatrixError, MatrixResult};
use crate::ledger::{MatrixToken, ModuleSlot};
use crate::math::{to_int256, to_uint256, PreciseUnitMath, PRECISE_UNIT};

// ============================================
// CONSTANTS
// ============================================

/// 365.25 days
pub const SECONDS_PER_YEAR: u64 = 31_557_600;

// ============================================
// TYPES
// ============================================

/// Per-token streaming fee parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeState {
    pub fee_recipient: Address,
    /// Annual rate ceiling, 18 decimals
    pub max_streaming_fee_percentage: U256,
    /// Annual rate, 18 decimals (2e16 = 2%/yr)
    pub streaming_fee_percentage: U256,
    /// Unix seconds
    pub last_streaming_fee_timestamp: u64,
}

/// Outcome of one actualization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeAccrual {
    pub fee_percentage: U256,
    pub fee_quantity: U256,
    pub manager_fee: U256,
    pub protocol_fee: U256,
    pub position_multiplier: I256,
    pub timestamp: u64,
}

// ============================================
// PURE MATH
// ============================================

/// Fraction of supply (18 decimals) owed since the last accrual
pub fn calculate_accrued_fee(state: &FeeState, now: u64) -> MatrixResult<U256> {
    let elapsed = now
        .checked_sub(state.last_streaming_fee_timestamp)
        .ok_or_else(|| MatrixError::invalid("timestamp precedes the last fee accrual"))?;

    let accrued = state
        .streaming_fee_percentage
        .checked_mul(U256::from(elapsed))
        .ok_or(ArithmeticError::Overflow)?;

    Ok(accrued / U256::from(SECONDS_PER_YEAR))
}

/// Quantity m such that m / (supply + m) == fee_percentage
pub fn calculate_inflation_amount(fee_percentage: U256, total_supply: U256) -> MatrixResult<U256> {
    let denominator = PRECISE_UNIT
        .checked_sub(fee_percentage)
        .ok_or(ArithmeticError::Underflow)?;
    if denominator.is_zero() {
        return Err(ArithmeticError::DivideByZero.into());
    }

    let numerator = fee_percentage
        .checked_mul(total_supply)
        .ok_or(ArithmeticError::Overflow)?;
    Ok(numerator / denominator)
}

/// multiplier * (1 - fee%), truncated
pub fn calculate_new_multiplier(multiplier: I256, fee_percentage: U256) -> MatrixResult<I256> {
    let retained = PRECISE_UNIT
        .checked_sub(fee_percentage)
        .ok_or(ArithmeticError::Underflow)?;
    let scaled = to_uint256(multiplier)?.precise_mul(retained)?;
    Ok(to_int256(scaled)?)
}

// ============================================
// MODULE
// ============================================

#[derive(Debug, Clone)]
pub struct StreamingFeeModule {
    address: Address,
    protocol_fee_recipient: Address,
    protocol_fee_split: U256,
}

impl StreamingFeeModule {
    pub fn new(address: Address, schedule: &ProtocolFeeSchedule) -> Self {
        Self {
            address,
            protocol_fee_recipient: schedule.fee_recipient,
            protocol_fee_split: schedule.streaming_fee_split,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Manager-only. Accrual starts at `now`.
    pub fn initialize(
        &self,
        token: &mut MatrixToken,
        caller: Address,
        settings: FeeState,
        now: u64,
    ) -> MatrixResult<()> {
        token.ensure_manager(caller)?;
        ensure_pending(token, self.address)?;

        ensure_below_one("max streaming fee", settings.max_streaming_fee_percentage)?;
        if settings.streaming_fee_percentage > settings.max_streaming_fee_percentage {
            return Err(MatrixError::invalid("streaming fee exceeds the maximum"));
        }
        if settings.fee_recipient == Address::ZERO {
            return Err(MatrixError::invalid("fee recipient must not be the zero address"));
        }

        token.atomically(|t| {
            t.module_data.claim(self.address, ModuleSlot::StreamingFee);
            t.module_data.fee_state = Some(FeeState {
                last_streaming_fee_timestamp: now,
                ..settings
            });
            t.initialize_module(self.address)
        })
    }

    fn fee_state(&self, token: &MatrixToken) -> MatrixResult<FeeState> {
        token
            .fee_state()
            .cloned()
            .ok_or_else(|| MatrixError::invalid(format!("streaming fee not initialized on {}", token.symbol())))
    }

    /// Accrued fee percentage at `now`, without touching the ledger
    pub fn get_fee(&self, token: &MatrixToken, now: u64) -> MatrixResult<U256> {
        calculate_accrued_fee(&self.fee_state(token)?, now)
    }

    /// Mint the accrued fee, dilute the multiplier and stamp the accrual time.
    ///
    /// Anyone may trigger this. A second call at the same timestamp accrues
    /// nothing and leaves supply and multiplier untouched.
    pub fn actualize_fee(&self, token: &mut MatrixToken, now: u64) -> MatrixResult<FeeAccrual> {
        token.ensure_module(self.address)?;
        let state = self.fee_state(token)?;

        token.atomically(|t| {
            let fee_percentage = calculate_accrued_fee(&state, now)?;
            let fee_quantity = calculate_inflation_amount(fee_percentage, t.total_supply())?;

            let mut protocol_fee = U256::ZERO;
            let mut manager_fee = U256::ZERO;

            if !fee_quantity.is_zero() {
                protocol_fee = fee_quantity.precise_mul(self.protocol_fee_split)?;
                manager_fee = fee_quantity - protocol_fee;

                if !protocol_fee.is_zero() {
                    t.mint(self.address, self.protocol_fee_recipient, protocol_fee)?;
                }
                if !manager_fee.is_zero() {
                    t.mint(self.address, state.fee_recipient, manager_fee)?;
                }

                let multiplier = calculate_new_multiplier(t.position_multiplier(), fee_percentage)?;
                t.edit_position_multiplier(self.address, multiplier)?;
            }

            if let Some(fee_state) = t.module_data.fee_state.as_mut() {
                fee_state.last_streaming_fee_timestamp = now;
            }

            if !fee_quantity.is_zero() {
                info!(
                    "💸 {} streaming fee: {} minted (manager {}, protocol {}), multiplier {}",
                    t.symbol(),
                    fee_quantity,
                    manager_fee,
                    protocol_fee,
                    t.position_multiplier()
                );
            } else {
                debug!("{} streaming fee: nothing accrued at {}", t.symbol(), now);
            }

            Ok(FeeAccrual {
                fee_percentage,
                fee_quantity,
                manager_fee,
                protocol_fee,
                position_multiplier: t.position_multiplier(),
                timestamp: now,
            })
        })
    }

    /// Manager-only. Accrues at the old rate up to `now` before switching.
    pub fn update_streaming_fee(
        &self,
        token: &mut MatrixToken,
        caller: Address,
        new_fee: U256,
        now: u64,
    ) -> MatrixResult<FeeAccrual> {
        token.ensure_manager(caller)?;
        let state = self.fee_state(token)?;
        if new_fee > state.max_streaming_fee_percentage {
            return Err(MatrixError::invalid("streaming fee exceeds the maximum"));
        }

        token.atomically(|t| {
            let accrual = self.actualize_fee(t, now)?;
            if let Some(fee_state) = t.module_data.fee_state.as_mut() {
                fee_state.streaming_fee_percentage = new_fee;
            }
            info!("{} streaming fee rate -> {}", t.symbol(), new_fee);
            Ok(accrual)
        })
    }

    pub fn update_fee_recipient(
        &self,
        token: &mut MatrixToken,
        caller: Address,
        recipient: Address,
    ) -> MatrixResult<()> {
        token.ensure_manager(caller)?;
        if recipient == Address::ZERO {
            return Err(MatrixError::invalid("fee recipient must not be the zero address"));
        }
        self.fee_state(token)?;

        if let Some(fee_state) = token.module_data.fee_state.as_mut() {
            fee_state.fee_recipient = recipient;
        }
        Ok(())
    }
}
