//! Direct Issuance Module
//!
//! Pro-rata issuance and redemption against every component position.
//!
//! Per component:
//! - equity units = default real unit + positive external real units
//! - debt units   = |negative external real units|
//!
//! Issue pulls equity in (rounded up) and pays debt out (rounded down);
//! redeem is the mirror. Position units never change: the transfers are
//! already proportional to supply.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ensure_below_one, ensure_pending, ProtocolFeeSchedule};
use crate::error::{ArithmeticError, MatrixError, MatrixResult};
use crate::external::{BalanceBook, Transfer};
use crate::ledger::{MatrixToken, ModuleSlot};
use crate::math::{to_uint256, PreciseUnitMath, SignedPreciseMath, UnsignedPreciseMath};

// ============================================
// TYPES
// ============================================

/// Per-token issuance fee terms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceSettings {
    pub max_manager_fee: U256,
    pub manager_issue_fee: U256,
    pub manager_redeem_fee: U256,
    pub fee_recipient: Address,
}

/// Component quantities for a given basket-token quantity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentIssuanceUnits {
    pub component: Address,
    pub equity: U256,
    pub debt: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuanceReceipt {
    pub quantity: U256,
    /// Quantity the collateral was sized for (quantity +/- fees)
    pub quantity_with_fees: U256,
    pub manager_fee: U256,
    pub protocol_fee: U256,
    pub components: Vec<ComponentIssuanceUnits>,
}

// ============================================
// MODULE
// ============================================

#[derive(Debug, Clone)]
pub struct IssuanceModule {
    address: Address,
    protocol_fee_recipient: Address,
    protocol_fee_split: U256,
}

impl IssuanceModule {
    pub fn new(address: Address, schedule: &ProtocolFeeSchedule) -> Self {
        Self {
            address,
            protocol_fee_recipient: schedule.fee_recipient,
            protocol_fee_split: schedule.issuance_fee_split,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn initialize(
        &self,
        token: &mut MatrixToken,
        caller: Address,
        settings: IssuanceSettings,
    ) -> MatrixResult<()> {
        token.ensure_manager(caller)?;
        ensure_pending(token, self.address)?;
        validate_settings(&settings)?;

        token.atomically(|t| {
            t.module_data.claim(self.address, ModuleSlot::Issuance);
            t.module_data.issuance_settings = Some(settings);
            t.initialize_module(self.address)
        })
    }

    fn settings(&self, token: &MatrixToken) -> MatrixResult<IssuanceSettings> {
        token
            .issuance_settings()
            .cloned()
            .ok_or_else(|| MatrixError::invalid(format!("issuance not initialized on {}", token.symbol())))
    }

    /// (quantity adjusted for fees, manager fee, protocol fee)
    ///
    /// Issue sizes collateral for `quantity + fee`, redeem for `quantity - fee`.
    pub fn calculate_total_fees(
        &self,
        token: &MatrixToken,
        quantity: U256,
        is_issue: bool,
    ) -> MatrixResult<(U256, U256, U256)> {
        let settings = self.settings(token)?;
        let rate = if is_issue {
            settings.manager_issue_fee
        } else {
            settings.manager_redeem_fee
        };

        let total_fee = rate.precise_mul(quantity)?;
        let protocol_fee = total_fee.precise_mul(self.protocol_fee_split)?;
        let manager_fee = total_fee - protocol_fee;

        let adjusted = if is_issue {
            quantity.checked_add(total_fee).ok_or(ArithmeticError::Overflow)?
        } else {
            // rate < 100%, so the fee never exceeds the quantity
            quantity - total_fee
        };

        Ok((adjusted, manager_fee, protocol_fee))
    }

    /// Equity and debt quantities per component for `quantity` basket tokens
    pub fn get_required_component_issuance_units(
        &self,
        token: &MatrixToken,
        quantity: U256,
        is_issue: bool,
    ) -> MatrixResult<Vec<ComponentIssuanceUnits>> {
        token
            .components()
            .iter()
            .map(|component| {
                let (equity_units, debt_units) = total_issuance_units(token, component)?;

                let (equity, debt) = if is_issue {
                    (equity_units.precise_mul_ceil(quantity)?, debt_units.precise_mul(quantity)?)
                } else {
                    (equity_units.precise_mul(quantity)?, debt_units.precise_mul_ceil(quantity)?)
                };

                Ok(ComponentIssuanceUnits {
                    component: *component,
                    equity,
                    debt,
                })
            })
            .collect()
    }

    /// Mint `quantity` to `to`; `caller` supplies equity and receives debt
    pub fn issue(
        &self,
        token: &mut MatrixToken,
        book: &mut BalanceBook,
        caller: Address,
        quantity: U256,
        to: Address,
    ) -> MatrixResult<IssuanceReceipt> {
        if quantity.is_zero() {
            return Err(MatrixError::invalid("issue quantity must be greater than zero"));
        }
        token.ensure_module(self.address)?;
        let settings = self.settings(token)?;

        token.atomically(|t| {
            let (quantity_with_fees, manager_fee, protocol_fee) =
                self.calculate_total_fees(t, quantity, true)?;
            let components = self.get_required_component_issuance_units(t, quantity_with_fees, true)?;

            t.mint(self.address, to, quantity)?;
            if !manager_fee.is_zero() {
                t.mint(self.address, settings.fee_recipient, manager_fee)?;
            }
            if !protocol_fee.is_zero() {
                t.mint(self.address, self.protocol_fee_recipient, protocol_fee)?;
            }

            let matrix = t.address();
            let legs: Vec<Transfer> = components
                .iter()
                .flat_map(|c| {
                    [
                        Transfer::new(c.component, caller, matrix, c.equity),
                        Transfer::new(c.component, matrix, caller, c.debt),
                    ]
                })
                .collect();
            book.transfer_batch(&legs)?;

            info!(
                "🪙 Issued {} {} to {} (manager fee {}, protocol fee {})",
                quantity,
                t.symbol(),
                to,
                manager_fee,
                protocol_fee
            );

            Ok(IssuanceReceipt {
                quantity,
                quantity_with_fees,
                manager_fee,
                protocol_fee,
                components,
            })
        })
    }

    /// Burn `quantity` from `caller`; `to` receives equity, `caller` repays debt
    pub fn redeem(
        &self,
        token: &mut MatrixToken,
        book: &mut BalanceBook,
        caller: Address,
        quantity: U256,
        to: Address,
    ) -> MatrixResult<IssuanceReceipt> {
        if quantity.is_zero() {
            return Err(MatrixError::invalid("redeem quantity must be greater than zero"));
        }
        token.ensure_module(self.address)?;
        let settings = self.settings(token)?;

        token.atomically(|t| {
            let (quantity_net_fees, manager_fee, protocol_fee) =
                self.calculate_total_fees(t, quantity, false)?;
            let components = self.get_required_component_issuance_units(t, quantity_net_fees, false)?;

            t.burn(self.address, caller, quantity)?;
            if !manager_fee.is_zero() {
                t.mint(self.address, settings.fee_recipient, manager_fee)?;
            }
            if !protocol_fee.is_zero() {
                t.mint(self.address, self.protocol_fee_recipient, protocol_fee)?;
            }

            let matrix = t.address();
            let legs: Vec<Transfer> = components
                .iter()
                .flat_map(|c| {
                    [
                        Transfer::new(c.component, caller, matrix, c.debt),
                        Transfer::new(c.component, matrix, to, c.equity),
                    ]
                })
                .collect();
            book.transfer_batch(&legs)?;

            info!(
                "🔥 Redeemed {} {} for {} (manager fee {}, protocol fee {})",
                quantity,
                t.symbol(),
                to,
                manager_fee,
                protocol_fee
            );

            Ok(IssuanceReceipt {
                quantity,
                quantity_with_fees: quantity_net_fees,
                manager_fee,
                protocol_fee,
                components,
            })
        })
    }

    pub fn update_issue_fee(&self, token: &mut MatrixToken, caller: Address, fee: U256) -> MatrixResult<()> {
        self.update_settings(token, caller, |s| s.manager_issue_fee = fee)
    }

    pub fn update_redeem_fee(&self, token: &mut MatrixToken, caller: Address, fee: U256) -> MatrixResult<()> {
        self.update_settings(token, caller, |s| s.manager_redeem_fee = fee)
    }

    pub fn update_fee_recipient(
        &self,
        token: &mut MatrixToken,
        caller: Address,
        recipient: Address,
    ) -> MatrixResult<()> {
        self.update_settings(token, caller, |s| s.fee_recipient = recipient)
    }

    fn update_settings<F>(&self, token: &mut MatrixToken, caller: Address, edit: F) -> MatrixResult<()>
    where
        F: FnOnce(&mut IssuanceSettings),
    {
        token.ensure_manager(caller)?;
        let mut settings = self.settings(token)?;
        edit(&mut settings);
        validate_settings(&settings)?;
        token.module_data.issuance_settings = Some(settings);
        Ok(())
    }
}

fn validate_settings(settings: &IssuanceSettings) -> MatrixResult<()> {
    ensure_below_one("max manager fee", settings.max_manager_fee)?;
    if settings.manager_issue_fee > settings.max_manager_fee {
        return Err(MatrixError::invalid("issue fee exceeds the maximum"));
    }
    if settings.manager_redeem_fee > settings.max_manager_fee {
        return Err(MatrixError::invalid("redeem fee exceeds the maximum"));
    }
    if settings.fee_recipient == Address::ZERO {
        return Err(MatrixError::invalid("fee recipient must not be the zero address"));
    }
    Ok(())
}

/// (equity units, debt units) of one component, both as unsigned real units
fn total_issuance_units(token: &MatrixToken, component: &Address) -> MatrixResult<(U256, U256)> {
    let mut equity = to_uint256(token.get_default_position_real_unit(component)?)?;
    let mut debt = U256::ZERO;

    for module in token.get_external_position_modules(component) {
        let unit = token.get_external_position_real_unit(component, &module)?;
        if unit.is_negative() {
            let owed = to_uint256(unit.checked_negate()?)?;
            debt = debt.checked_add(owed).ok_or(ArithmeticError::Overflow)?;
        } else {
            equity = equity
                .checked_add(to_uint256(unit)?)
                .ok_or(ArithmeticError::Overflow)?;
        }
    }

    Ok((equity, debt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::math::{precise_unit_int, PRECISE_UNIT};
    use alloy_primitives::{Bytes, I256};

    const MANAGER: u8 = 0xAA;
    const MODULE: u8 = 0xB2;
    const LENDER: u8 = 0xC0;
    const ALICE: u8 = 0xA1;
    const RECIPIENT: u8 = 0xD1;
    const PROTOCOL: u8 = 0xD2;

    fn addr(n: u8) -> Address {
        Address::with_last_byte(n)
    }

    fn e18(n: u64) -> U256 {
        U256::from(n) * PRECISE_UNIT
    }

    fn settings(fee: U256) -> IssuanceSettings {
        IssuanceSettings {
            max_manager_fee: U256::from(50_000_000_000_000_000u64),
            manager_issue_fee: fee,
            manager_redeem_fee: fee,
            fee_recipient: addr(RECIPIENT),
        }
    }

    /// Components: 1 (1.0 default), 2 (0.5 default + 1.0 debt via LENDER)
    fn setup(fee: U256, split: U256) -> (MatrixToken, IssuanceModule, BalanceBook) {
        let schedule = ProtocolFeeSchedule {
            fee_recipient: addr(PROTOCOL),
            issuance_fee_split: split,
            ..Default::default()
        };
        let module = IssuanceModule::new(addr(MODULE), &schedule);
        let half = I256::from_raw(PRECISE_UNIT / U256::from(2));
        let mut token = MatrixToken::new(
            addr(0xF0),
            "Levered Matrix",
            "LEV",
            addr(MANAGER),
            &[addr(1), addr(2)],
            &[precise_unit_int(), half],
            &[addr(MODULE)],
        )
        .unwrap();
        module.initialize(&mut token, addr(MANAGER), settings(fee)).unwrap();
        token
            .edit_external_position(addr(MANAGER), addr(2), addr(LENDER), -precise_unit_int(), Bytes::new())
            .unwrap();

        let mut book = BalanceBook::new();
        book.credit(addr(ALICE), addr(1), e18(100)).unwrap();
        book.credit(addr(ALICE), addr(2), e18(100)).unwrap();
        // borrowed debt asset parked in the basket, ready to hand out
        book.credit(addr(0xF0), addr(2), e18(100)).unwrap();
        (token, module, book)
    }

    #[test]
    fn test_equity_and_debt_units() {
        let (token, module, _) = setup(U256::ZERO, U256::ZERO);
        let units = module
            .get_required_component_issuance_units(&token, e18(2), true)
            .unwrap();

        assert_eq!(units[0], ComponentIssuanceUnits { component: addr(1), equity: e18(2), debt: U256::ZERO });
        assert_eq!(units[1], ComponentIssuanceUnits { component: addr(2), equity: e18(1), debt: e18(2) });
    }

    #[test]
    fn test_rounding_favours_the_basket() {
        let (token, module, _) = setup(U256::ZERO, U256::ZERO);
        // 3 wei of a 0.5 unit: issue needs 2, redeem returns 1
        let issue = module.get_required_component_issuance_units(&token, U256::from(3), true).unwrap();
        let redeem = module.get_required_component_issuance_units(&token, U256::from(3), false).unwrap();
        assert_eq!(issue[1].equity, U256::from(2));
        assert_eq!(redeem[1].equity, U256::from(1));
        // debt rounds the other way
        assert_eq!(issue[1].debt, U256::from(3));
        assert_eq!(redeem[1].debt, U256::from(3));
    }

    #[test]
    fn test_issue_and_redeem_round_trip() {
        let (mut token, module, mut book) = setup(U256::ZERO, U256::ZERO);
        module
            .issue(&mut token, &mut book, addr(ALICE), e18(10), addr(ALICE))
            .unwrap();

        assert_eq!(token.balance_of(&addr(ALICE)), e18(10));
        assert_eq!(book.balance_of(addr(0xF0), addr(1)), e18(10));
        // 5 equity in, 10 debt out
        assert_eq!(book.balance_of(addr(ALICE), addr(2)), e18(105));

        // units unchanged
        assert_eq!(token.get_default_position_real_unit(&addr(1)).unwrap(), precise_unit_int());

        module
            .redeem(&mut token, &mut book, addr(ALICE), e18(10), addr(ALICE))
            .unwrap();
        assert_eq!(token.total_supply(), U256::ZERO);
        assert_eq!(book.balance_of(addr(ALICE), addr(1)), e18(100));
        assert_eq!(book.balance_of(addr(ALICE), addr(2)), e18(100));
    }

    #[test]
    fn test_issue_fees_split() {
        // 1% fee, 20% of it to the protocol
        let fee = U256::from(10_000_000_000_000_000u64);
        let split = U256::from(200_000_000_000_000_000u64);
        let (mut token, module, mut book) = setup(fee, split);

        let receipt = module
            .issue(&mut token, &mut book, addr(ALICE), e18(10), addr(ALICE))
            .unwrap();

        assert_eq!(receipt.quantity_with_fees, e18(10) + U256::from(100_000_000_000_000_000u64));
        assert_eq!(receipt.protocol_fee, U256::from(20_000_000_000_000_000u64));
        assert_eq!(receipt.manager_fee, U256::from(80_000_000_000_000_000u64));
        assert_eq!(token.balance_of(&addr(RECIPIENT)), receipt.manager_fee);
        assert_eq!(token.balance_of(&addr(PROTOCOL)), receipt.protocol_fee);
        assert_eq!(token.total_supply(), receipt.quantity_with_fees);
    }

    #[test]
    fn test_failed_issue_leaves_everything_untouched() {
        let (mut token, module, mut book) = setup(U256::ZERO, U256::ZERO);
        let err = module
            .issue(&mut token, &mut book, addr(ALICE), e18(500), addr(ALICE))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
        assert_eq!(token.total_supply(), U256::ZERO);
        assert_eq!(book.balance_of(addr(ALICE), addr(1)), e18(100));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let (mut token, module, mut book) = setup(U256::ZERO, U256::ZERO);
        let err = module
            .issue(&mut token, &mut book, addr(ALICE), U256::ZERO, addr(ALICE))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_fee_updates_respect_max() {
        let (mut token, module, _) = setup(U256::ZERO, U256::ZERO);
        assert!(module.update_issue_fee(&mut token, addr(MANAGER), PRECISE_UNIT).is_err());
        assert!(module.update_redeem_fee(&mut token, addr(ALICE), U256::from(1)).is_err());

        module.update_redeem_fee(&mut token, addr(MANAGER), U256::from(1)).unwrap();
        assert_eq!(token.issuance_settings().unwrap().manager_redeem_fee, U256::from(1));
    }
}
