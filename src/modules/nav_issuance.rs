//! NAV Issuance Module
//!
//! Issue basket tokens for a single reserve asset priced against the basket's
//! valuation, and redeem them back into that reserve asset.
//!
//! ISSUE:
//!   net      = deposit - protocol fees - manager fee
//!   mint     = net' * supply / (supply * NAV + net - net')      net' = net after premium
//!   mult'    = mult * supply / (supply + mint)
//!   reserve' = (reserve * supply + net) / (supply + mint)
//!
//! REDEEM:
//!   gross    = qty * NAV * 10^decimals, less the premium (rounded up)
//!   net      = gross - protocol fees - manager fee
//!   mult'    = mult * supply / (supply - qty)
//!   reserve' = (reserve * supply - gross) / (supply - qty)
//!
//! Quantities in the reserve asset are in its native decimals; NAV and
//! basket-token quantities are 18 decimals.

use alloy_primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ensure_below_one, ensure_pending, ProtocolFeeSchedule};
use crate::error::{ArithmeticError, MatrixError, MatrixResult};
use crate::external::{BalanceBook, Transfer, ValuationSource};
use crate::ledger::{MatrixToken, ModuleSlot};
use crate::math::{
    safe_power, to_int256, to_uint256, PreciseUnitMath, UnsignedPreciseMath, PRECISE_UNIT,
};

// ============================================
// TYPES
// ============================================

/// Per-token NAV issuance terms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavIssuanceSettings {
    pub reserve_assets: Vec<Address>,
    pub fee_recipient: Address,
    pub manager_issue_fee: U256,
    pub manager_redeem_fee: U256,
    pub max_manager_fee: U256,
    pub premium_percentage: U256,
    pub max_premium_percentage: U256,
    /// Issuance needs at least this much supply; redemption may not go below it
    pub min_matrix_token_supply: U256,
}

/// Fee terms resolved for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FeeTerms {
    protocol: U256,
    manager: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NavIssueReceipt {
    pub reserve_asset: Address,
    pub reserve_quantity: U256,
    pub protocol_fee: U256,
    pub manager_fee: U256,
    pub net_flow_quantity: U256,
    pub matrix_quantity: U256,
    pub previous_supply: U256,
    pub new_supply: U256,
    pub new_position_multiplier: I256,
    pub new_reserve_position_unit: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NavRedeemReceipt {
    pub reserve_asset: Address,
    pub matrix_quantity: U256,
    pub pre_fee_reserve_quantity: U256,
    pub protocol_fee: U256,
    pub manager_fee: U256,
    pub net_flow_quantity: U256,
    pub previous_supply: U256,
    pub new_supply: U256,
    pub new_position_multiplier: I256,
    pub new_reserve_position_unit: U256,
}

// ============================================
// MODULE
// ============================================

#[derive(Debug, Clone)]
pub struct NavIssuanceModule {
    address: Address,
    protocol_fee_recipient: Address,
    issue_direct_fee: U256,
    redeem_direct_fee: U256,
    issue_revenue_share: U256,
    redeem_revenue_share: U256,
}

impl NavIssuanceModule {
    pub fn new(address: Address, schedule: &ProtocolFeeSchedule) -> Self {
        Self {
            address,
            protocol_fee_recipient: schedule.fee_recipient,
            issue_direct_fee: schedule.nav_issue_direct_fee,
            redeem_direct_fee: schedule.nav_redeem_direct_fee,
            issue_revenue_share: schedule.nav_issue_manager_revenue_share,
            redeem_revenue_share: schedule.nav_redeem_manager_revenue_share,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn initialize(
        &self,
        token: &mut MatrixToken,
        caller: Address,
        settings: NavIssuanceSettings,
    ) -> MatrixResult<()> {
        token.ensure_manager(caller)?;
        ensure_pending(token, self.address)?;
        validate_settings(&settings)?;

        token.atomically(|t| {
            t.module_data.claim(self.address, ModuleSlot::NavIssuance);
            t.module_data.nav_settings = Some(settings);
            t.initialize_module(self.address)
        })
    }

    fn settings(&self, token: &MatrixToken) -> MatrixResult<NavIssuanceSettings> {
        token
            .nav_settings()
            .cloned()
            .ok_or_else(|| MatrixError::invalid(format!("NAV issuance not initialized on {}", token.symbol())))
    }

    pub fn is_reserve_asset(&self, token: &MatrixToken, asset: &Address) -> bool {
        token
            .nav_settings()
            .map(|s| s.reserve_assets.contains(asset))
            .unwrap_or(false)
    }

    /// Protocol takes its direct fee plus a share of the manager fee
    fn fee_terms(&self, settings: &NavIssuanceSettings, is_issue: bool) -> MatrixResult<FeeTerms> {
        let (manager_fee, revenue_share, direct_fee) = if is_issue {
            (settings.manager_issue_fee, self.issue_revenue_share, self.issue_direct_fee)
        } else {
            (settings.manager_redeem_fee, self.redeem_revenue_share, self.redeem_direct_fee)
        };

        let protocol_share = revenue_share.precise_mul(manager_fee)?;
        let protocol = protocol_share
            .checked_add(direct_fee)
            .ok_or(ArithmeticError::Overflow)?;

        let terms = FeeTerms {
            protocol,
            manager: manager_fee - protocol_share,
        };
        if terms.protocol.saturating_add(terms.manager) >= PRECISE_UNIT {
            return Err(MatrixError::invalid("combined protocol and manager fees reach 100%"));
        }
        Ok(terms)
    }

    /// (protocol fee, manager fee, net) for a reserve quantity
    fn apply_fees(quantity: U256, terms: FeeTerms) -> MatrixResult<(U256, U256, U256)> {
        let protocol_fee = quantity.precise_mul(terms.protocol)?;
        let manager_fee = quantity.precise_mul(terms.manager)?;
        let net = quantity
            .checked_sub(protocol_fee)
            .and_then(|q| q.checked_sub(manager_fee))
            .ok_or(ArithmeticError::Underflow)?;
        Ok((protocol_fee, manager_fee, net))
    }

    fn validate_reserve_asset(&self, token: &MatrixToken, asset: &Address) -> MatrixResult<()> {
        if !self.is_reserve_asset(token, asset) {
            return Err(MatrixError::invalid(format!("{} is not a valid reserve asset", asset)));
        }
        Ok(())
    }

    // ============================================
    // ISSUE
    // ============================================

    /// Basket tokens minted for `net_flow` reserve units after fees
    fn matrix_mint_quantity(
        &self,
        token: &MatrixToken,
        valuer: &dyn ValuationSource,
        settings: &NavIssuanceSettings,
        reserve_asset: Address,
        net_flow: U256,
    ) -> MatrixResult<U256> {
        let valuation = valuer.valuation(token, reserve_asset)?;
        if valuation.is_zero() {
            return Err(ArithmeticError::DivideByZero.into());
        }
        let decimals = valuer.asset_decimals(reserve_asset)?;
        let scale = safe_power(U256::from(10), u32::from(decimals))?;

        let premium_value = net_flow.precise_mul(settings.premium_percentage)?;
        let normalized_net = net_flow.precise_div(scale)?;
        let normalized_net_of_premium = (net_flow - premium_value).precise_div(scale)?;

        let supply = token.total_supply();
        if supply.is_zero() {
            // nothing to dilute; price straight off the valuation
            return Ok(normalized_net_of_premium.precise_div(valuation)?);
        }

        let denominator = supply
            .precise_mul(valuation)?
            .checked_add(normalized_net)
            .ok_or(ArithmeticError::Overflow)?
            - normalized_net_of_premium;

        Ok(normalized_net_of_premium.precise_mul(supply)?.precise_div(denominator)?)
    }

    fn build_issue(
        &self,
        token: &MatrixToken,
        valuer: &dyn ValuationSource,
        settings: &NavIssuanceSettings,
        reserve_asset: Address,
        reserve_quantity: U256,
    ) -> MatrixResult<NavIssueReceipt> {
        let terms = self.fee_terms(settings, true)?;
        let (protocol_fee, manager_fee, net_flow_quantity) = Self::apply_fees(reserve_quantity, terms)?;

        let matrix_quantity =
            self.matrix_mint_quantity(token, valuer, settings, reserve_asset, net_flow_quantity)?;

        let previous_supply = token.total_supply();
        let new_supply = previous_supply
            .checked_add(matrix_quantity)
            .ok_or(ArithmeticError::Overflow)?;

        let new_position_multiplier = if previous_supply.is_zero() {
            token.position_multiplier()
        } else {
            rescale_multiplier(token.position_multiplier(), previous_supply, new_supply)?
        };

        let existing_unit = to_uint256(token.get_default_position_real_unit(&reserve_asset)?)?;
        let total_reserve = existing_unit
            .precise_mul(previous_supply)?
            .checked_add(net_flow_quantity)
            .ok_or(ArithmeticError::Overflow)?;
        let new_reserve_position_unit = total_reserve.precise_div(new_supply)?;

        Ok(NavIssueReceipt {
            reserve_asset,
            reserve_quantity,
            protocol_fee,
            manager_fee,
            net_flow_quantity,
            matrix_quantity,
            previous_supply,
            new_supply,
            new_position_multiplier,
            new_reserve_position_unit,
        })
    }

    /// Basket tokens `reserve_quantity` would mint right now
    pub fn get_expected_matrix_issue_quantity(
        &self,
        token: &MatrixToken,
        valuer: &dyn ValuationSource,
        reserve_asset: Address,
        reserve_quantity: U256,
    ) -> MatrixResult<U256> {
        let settings = self.settings(token)?;
        let terms = self.fee_terms(&settings, true)?;
        let (_, _, net) = Self::apply_fees(reserve_quantity, terms)?;
        self.matrix_mint_quantity(token, valuer, &settings, reserve_asset, net)
    }

    pub fn is_issue_valid(&self, token: &MatrixToken, reserve_asset: Address, reserve_quantity: U256) -> bool {
        self.settings(token)
            .map(|s| {
                !reserve_quantity.is_zero()
                    && s.reserve_assets.contains(&reserve_asset)
                    && token.total_supply() >= s.min_matrix_token_supply
            })
            .unwrap_or(false)
    }

    /// Deposit `reserve_quantity` from `caller` and mint to `to`
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        &self,
        token: &mut MatrixToken,
        book: &mut BalanceBook,
        valuer: &dyn ValuationSource,
        caller: Address,
        reserve_asset: Address,
        reserve_quantity: U256,
        min_matrix_receive: U256,
        to: Address,
    ) -> MatrixResult<NavIssueReceipt> {
        token.ensure_module(self.address)?;
        let settings = self.settings(token)?;

        if reserve_quantity.is_zero() {
            return Err(MatrixError::invalid("reserve quantity must be greater than zero"));
        }
        self.validate_reserve_asset(token, &reserve_asset)?;
        if token.total_supply() < settings.min_matrix_token_supply {
            return Err(MatrixError::invalid("supply is below the minimum required for issuance"));
        }

        let receipt = self.build_issue(token, valuer, &settings, reserve_asset, reserve_quantity)?;
        if receipt.matrix_quantity.is_zero() {
            return Err(MatrixError::invalid("deposit too small to mint any basket tokens"));
        }
        if receipt.matrix_quantity < min_matrix_receive {
            return Err(MatrixError::invalid(format!(
                "mint quantity {} below minimum {}",
                receipt.matrix_quantity, min_matrix_receive
            )));
        }

        token.atomically(|t| {
            t.mint(self.address, to, receipt.matrix_quantity)?;
            t.edit_position_multiplier(self.address, receipt.new_position_multiplier)?;
            t.edit_default_position_real_unit(
                self.address,
                reserve_asset,
                to_int256(receipt.new_reserve_position_unit)?,
            )?;

            let matrix = t.address();
            book.transfer_batch(&[
                Transfer::new(reserve_asset, caller, matrix, receipt.net_flow_quantity),
                Transfer::new(reserve_asset, caller, self.protocol_fee_recipient, receipt.protocol_fee),
                Transfer::new(reserve_asset, caller, settings.fee_recipient, receipt.manager_fee),
            ])?;

            info!(
                "🪙 NAV issue: {} {} for {} reserve (net {}), multiplier {}",
                receipt.matrix_quantity,
                t.symbol(),
                receipt.reserve_quantity,
                receipt.net_flow_quantity,
                receipt.new_position_multiplier
            );
            Ok(receipt)
        })
    }

    // ============================================
    // REDEEM
    // ============================================

    /// Reserve owed for `matrix_quantity` before fees, premium already removed
    fn redeem_reserve_quantity(
        &self,
        token: &MatrixToken,
        valuer: &dyn ValuationSource,
        settings: &NavIssuanceSettings,
        reserve_asset: Address,
        matrix_quantity: U256,
    ) -> MatrixResult<U256> {
        let valuation = valuer.valuation(token, reserve_asset)?;
        if valuation.is_zero() {
            return Err(ArithmeticError::DivideByZero.into());
        }
        let decimals = valuer.asset_decimals(reserve_asset)?;
        let scale = safe_power(U256::from(10), u32::from(decimals))?;

        let pre_premium = matrix_quantity.precise_mul(valuation)?.precise_mul(scale)?;
        let premium = pre_premium.precise_mul_ceil(settings.premium_percentage)?;
        Ok(pre_premium - premium)
    }

    fn build_redeem(
        &self,
        token: &MatrixToken,
        valuer: &dyn ValuationSource,
        settings: &NavIssuanceSettings,
        reserve_asset: Address,
        matrix_quantity: U256,
    ) -> MatrixResult<NavRedeemReceipt> {
        let pre_fee_reserve_quantity =
            self.redeem_reserve_quantity(token, valuer, settings, reserve_asset, matrix_quantity)?;
        let terms = self.fee_terms(settings, false)?;
        let (protocol_fee, manager_fee, net_flow_quantity) =
            Self::apply_fees(pre_fee_reserve_quantity, terms)?;

        let previous_supply = token.total_supply();
        let new_supply = previous_supply
            .checked_sub(matrix_quantity)
            .ok_or(ArithmeticError::Underflow)?;

        let existing_unit = to_uint256(token.get_default_position_real_unit(&reserve_asset)?)?;
        let total_existing = existing_unit.precise_mul(previous_supply)?;
        if total_existing < pre_fee_reserve_quantity {
            return Err(MatrixError::InsufficientBalance {
                asset: reserve_asset,
                required: pre_fee_reserve_quantity,
                available: total_existing,
            });
        }
        let remaining = total_existing - pre_fee_reserve_quantity;

        let (new_position_multiplier, new_reserve_position_unit) = if new_supply.is_zero() {
            (token.position_multiplier(), U256::ZERO)
        } else {
            (
                rescale_multiplier(token.position_multiplier(), previous_supply, new_supply)?,
                remaining.precise_div(new_supply)?,
            )
        };

        Ok(NavRedeemReceipt {
            reserve_asset,
            matrix_quantity,
            pre_fee_reserve_quantity,
            protocol_fee,
            manager_fee,
            net_flow_quantity,
            previous_supply,
            new_supply,
            new_position_multiplier,
            new_reserve_position_unit,
        })
    }

    /// Reserve `to` would receive for redeeming `matrix_quantity` right now
    pub fn get_expected_reserve_redeem_quantity(
        &self,
        token: &MatrixToken,
        valuer: &dyn ValuationSource,
        reserve_asset: Address,
        matrix_quantity: U256,
    ) -> MatrixResult<U256> {
        let settings = self.settings(token)?;
        let gross = self.redeem_reserve_quantity(token, valuer, &settings, reserve_asset, matrix_quantity)?;
        let terms = self.fee_terms(&settings, false)?;
        let (_, _, net) = Self::apply_fees(gross, terms)?;
        Ok(net)
    }

    pub fn is_redeem_valid(
        &self,
        token: &MatrixToken,
        valuer: &dyn ValuationSource,
        reserve_asset: Address,
        matrix_quantity: U256,
    ) -> bool {
        let Ok(settings) = self.settings(token) else {
            return false;
        };
        let supply = token.total_supply();
        if matrix_quantity.is_zero()
            || !settings.reserve_assets.contains(&reserve_asset)
            || supply < matrix_quantity
            || supply - matrix_quantity < settings.min_matrix_token_supply
        {
            return false;
        }
        self.build_redeem(token, valuer, &settings, reserve_asset, matrix_quantity)
            .is_ok()
    }

    /// Burn `matrix_quantity` from `caller` and pay the reserve out to `to`
    #[allow(clippy::too_many_arguments)]
    pub fn redeem(
        &self,
        token: &mut MatrixToken,
        book: &mut BalanceBook,
        valuer: &dyn ValuationSource,
        caller: Address,
        reserve_asset: Address,
        matrix_quantity: U256,
        min_reserve_receive: U256,
        to: Address,
    ) -> MatrixResult<NavRedeemReceipt> {
        token.ensure_module(self.address)?;
        let settings = self.settings(token)?;

        if matrix_quantity.is_zero() {
            return Err(MatrixError::invalid("redeem quantity must be greater than zero"));
        }
        self.validate_reserve_asset(token, &reserve_asset)?;
        let remaining_supply = token
            .total_supply()
            .checked_sub(matrix_quantity)
            .ok_or(ArithmeticError::Underflow)?;
        if remaining_supply < settings.min_matrix_token_supply {
            return Err(MatrixError::invalid("redemption would leave supply below the minimum"));
        }

        let receipt = self.build_redeem(token, valuer, &settings, reserve_asset, matrix_quantity)?;
        if receipt.net_flow_quantity < min_reserve_receive {
            return Err(MatrixError::invalid(format!(
                "reserve quantity {} below minimum {}",
                receipt.net_flow_quantity, min_reserve_receive
            )));
        }

        token.atomically(|t| {
            t.burn(self.address, caller, matrix_quantity)?;
            t.edit_position_multiplier(self.address, receipt.new_position_multiplier)?;
            t.edit_default_position_real_unit(
                self.address,
                reserve_asset,
                to_int256(receipt.new_reserve_position_unit)?,
            )?;

            let matrix = t.address();
            book.transfer_batch(&[
                Transfer::new(reserve_asset, matrix, to, receipt.net_flow_quantity),
                Transfer::new(reserve_asset, matrix, self.protocol_fee_recipient, receipt.protocol_fee),
                Transfer::new(reserve_asset, matrix, settings.fee_recipient, receipt.manager_fee),
            ])?;

            info!(
                "🔥 NAV redeem: {} {} for {} reserve (net {}), multiplier {}",
                matrix_quantity,
                t.symbol(),
                receipt.pre_fee_reserve_quantity,
                receipt.net_flow_quantity,
                receipt.new_position_multiplier
            );
            Ok(receipt)
        })
    }

    // ============================================
    // MANAGER SETTINGS
    // ============================================

    pub fn add_reserve_asset(&self, token: &mut MatrixToken, caller: Address, asset: Address) -> MatrixResult<()> {
        self.update_settings(token, caller, |s| {
            if s.reserve_assets.contains(&asset) {
                return Err(MatrixError::invalid(format!("{} is already a reserve asset", asset)));
            }
            s.reserve_assets.push(asset);
            Ok(())
        })
    }

    pub fn remove_reserve_asset(&self, token: &mut MatrixToken, caller: Address, asset: Address) -> MatrixResult<()> {
        self.update_settings(token, caller, |s| {
            let before = s.reserve_assets.len();
            s.reserve_assets.retain(|a| *a != asset);
            if s.reserve_assets.len() == before {
                return Err(MatrixError::invalid(format!("{} is not a reserve asset", asset)));
            }
            Ok(())
        })
    }

    pub fn edit_premium(&self, token: &mut MatrixToken, caller: Address, premium: U256) -> MatrixResult<()> {
        self.update_settings(token, caller, |s| {
            s.premium_percentage = premium;
            Ok(())
        })
    }

    pub fn edit_manager_fee(
        &self,
        token: &mut MatrixToken,
        caller: Address,
        fee: U256,
        is_issue: bool,
    ) -> MatrixResult<()> {
        self.update_settings(token, caller, |s| {
            if is_issue {
                s.manager_issue_fee = fee;
            } else {
                s.manager_redeem_fee = fee;
            }
            Ok(())
        })
    }

    pub fn edit_fee_recipient(&self, token: &mut MatrixToken, caller: Address, recipient: Address) -> MatrixResult<()> {
        self.update_settings(token, caller, |s| {
            s.fee_recipient = recipient;
            Ok(())
        })
    }

    fn update_settings<F>(&self, token: &mut MatrixToken, caller: Address, edit: F) -> MatrixResult<()>
    where
        F: FnOnce(&mut NavIssuanceSettings) -> MatrixResult<()>,
    {
        token.ensure_manager(caller)?;
        let mut settings = self.settings(token)?;
        edit(&mut settings)?;
        validate_settings(&settings)?;
        debug!("{} NAV issuance settings updated", token.symbol());
        token.module_data.nav_settings = Some(settings);
        Ok(())
    }
}

/// mult * previous / new, the same dilution streaming fees apply
fn rescale_multiplier(multiplier: I256, previous_supply: U256, new_supply: U256) -> MatrixResult<I256> {
    if new_supply.is_zero() {
        return Err(ArithmeticError::DivideByZero.into());
    }
    let scaled = to_uint256(multiplier)?
        .checked_mul(previous_supply)
        .ok_or(ArithmeticError::Overflow)?
        / new_supply;
    Ok(to_int256(scaled)?)
}

fn validate_settings(settings: &NavIssuanceSettings) -> MatrixResult<()> {
    if settings.reserve_assets.is_empty() {
        return Err(MatrixError::invalid("at least one reserve asset is required"));
    }
    for (i, asset) in settings.reserve_assets.iter().enumerate() {
        if settings.reserve_assets[..i].contains(asset) {
            return Err(MatrixError::invalid(format!("duplicate reserve asset {}", asset)));
        }
    }

    ensure_below_one("max manager fee", settings.max_manager_fee)?;
    ensure_below_one("max premium", settings.max_premium_percentage)?;
    if settings.manager_issue_fee > settings.max_manager_fee
        || settings.manager_redeem_fee > settings.max_manager_fee
    {
        return Err(MatrixError::invalid("manager fee exceeds the maximum"));
    }
    if settings.premium_percentage > settings.max_premium_percentage {
        return Err(MatrixError::invalid("premium exceeds the maximum"));
    }
    if settings.min_matrix_token_supply.is_zero() {
        return Err(MatrixError::invalid("minimum supply must be greater than zero"));
    }
    if settings.fee_recipient == Address::ZERO {
        return Err(MatrixError::invalid("fee recipient must not be the zero address"));
    }
    Ok(())
}
