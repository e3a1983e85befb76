//! Boundary contracts the accounting core consumes
//!
//! - [`ModuleAuthority`]: may this caller touch this basket token's ledger?
//! - [`ValuationSource`]: NAV of a basket token in a quote asset
//! - [`BalanceSource`]: real holdings of a component by a basket token
//!
//! Also ships the in-memory implementations the binaries and tests run on:
//! [`BalanceBook`] (multi-asset balances with atomic batch transfers) and
//! [`ComponentValuer`] (price table valuation).

use alloy_primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::error::{MatrixError, MatrixResult};
use crate::ledger::MatrixToken;
use crate::math::{safe_power, to_int256, to_uint256, PreciseUnitMath};

// ============================================
// TRAITS
// ============================================

pub trait ModuleAuthority {
    fn is_authorized_module(&self, matrix: Address, caller: Address) -> bool;
}

/// Opaque, possibly failing price source. Failures surface as
/// `MatrixError::ValuationUnavailable` and are never retried by the core.
pub trait ValuationSource {
    /// Value of one whole basket token (10^18 units) in `quote_asset`, 18 decimals
    fn valuation(&self, matrix: &MatrixToken, quote_asset: Address) -> MatrixResult<U256>;

    /// Native decimals of an asset
    fn asset_decimals(&self, asset: Address) -> MatrixResult<u8>;
}

pub trait BalanceSource {
    fn component_balance(&self, matrix: Address, component: Address) -> U256;
}

// ============================================
// BALANCE BOOK
// ============================================

/// One leg of a batch transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub asset: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

impl Transfer {
    pub fn new(asset: Address, from: Address, to: Address, amount: U256) -> Self {
        Self { asset, from, to, amount }
    }
}

/// In-memory (holder, asset) -> balance table
#[derive(Debug, Clone, Default)]
pub struct BalanceBook {
    balances: HashMap<(Address, Address), U256>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, holder: Address, asset: Address) -> U256 {
        self.balances.get(&(holder, asset)).copied().unwrap_or(U256::ZERO)
    }

    /// Credit out of thin air (funding accounts, simulating airdrops)
    pub fn credit(&mut self, holder: Address, asset: Address, amount: U256) -> MatrixResult<()> {
        let balance = self
            .balance_of(holder, asset)
            .checked_add(amount)
            .ok_or(crate::error::ArithmeticError::Overflow)?;
        self.balances.insert((holder, asset), balance);
        Ok(())
    }

    pub fn transfer(&mut self, transfer: Transfer) -> MatrixResult<()> {
        self.transfer_batch(&[transfer])
    }

    /// All legs apply or none do
    pub fn transfer_batch(&mut self, transfers: &[Transfer]) -> MatrixResult<()> {
        let mut staged = self.clone();
        for transfer in transfers {
            staged.apply(transfer)?;
        }
        *self = staged;
        debug!("Applied {} transfer legs", transfers.len());
        Ok(())
    }

    fn apply(&mut self, transfer: &Transfer) -> MatrixResult<()> {
        if transfer.amount.is_zero() || transfer.from == transfer.to {
            return Ok(());
        }

        let available = self.balance_of(transfer.from, transfer.asset);
        if available < transfer.amount {
            return Err(MatrixError::InsufficientBalance {
                asset: transfer.asset,
                required: transfer.amount,
                available,
            });
        }

        self.balances
            .insert((transfer.from, transfer.asset), available - transfer.amount);
        self.credit(transfer.to, transfer.asset, transfer.amount)?;
        trace!(
            "{} of {} moved {} -> {}",
            transfer.amount,
            transfer.asset,
            transfer.from,
            transfer.to
        );
        Ok(())
    }
}

impl BalanceSource for BalanceBook {
    fn component_balance(&self, matrix: Address, component: Address) -> U256 {
        self.balance_of(matrix, component)
    }
}

// ============================================
// COMPONENT VALUER
// ============================================

/// Values a basket token from a price table denominated in one master quote asset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentValuer {
    pub master_quote_asset: Address,
    /// Price of one whole token in the master quote asset, 18 decimals
    prices: HashMap<Address, U256>,
    decimals: HashMap<Address, u8>,
}

impl ComponentValuer {
    pub fn new(master_quote_asset: Address) -> Self {
        let mut valuer = Self {
            master_quote_asset,
            ..Default::default()
        };
        valuer.prices.insert(master_quote_asset, crate::math::PRECISE_UNIT);
        valuer
    }

    pub fn set_asset(&mut self, asset: Address, price: U256, decimals: u8) {
        self.prices.insert(asset, price);
        self.decimals.insert(asset, decimals);
    }

    pub fn set_price(&mut self, asset: Address, price: U256) {
        self.prices.insert(asset, price);
    }

    pub fn price(&self, asset: &Address) -> MatrixResult<U256> {
        self.prices
            .get(asset)
            .copied()
            .ok_or_else(|| MatrixError::ValuationUnavailable(format!("no price for {}", asset)))
    }
}

impl ValuationSource for ComponentValuer {
    fn valuation(&self, matrix: &MatrixToken, quote_asset: Address) -> MatrixResult<U256> {
        // debt components subtract; only the net value has to stay non-negative
        let mut net = I256::ZERO;

        for component in matrix.components() {
            let units = matrix.get_total_component_real_units(component)?;
            let scale = safe_power(U256::from(10), u32::from(self.asset_decimals(*component)?))?;
            let normalized = units.precise_div(to_int256(scale)?)?;
            let component_value = normalized.precise_mul(to_int256(self.price(component)?)?)?;
            net = net
                .checked_add(component_value)
                .ok_or(crate::error::ArithmeticError::Overflow)?;
        }

        if net.is_negative() {
            return Err(MatrixError::ValuationUnavailable(format!(
                "{} is worth less than its debt ({})",
                matrix.symbol(),
                net
            )));
        }

        let mut value = to_uint256(net)?;
        if quote_asset != self.master_quote_asset {
            value = value.precise_div(self.price(&quote_asset)?)?;
        }

        debug!("{} valued at {} in {}", matrix.symbol(), value, quote_asset);
        Ok(value)
    }

    fn asset_decimals(&self, asset: Address) -> MatrixResult<u8> {
        self.decimals
            .get(&asset)
            .copied()
            .ok_or_else(|| MatrixError::ValuationUnavailable(format!("unknown decimals for {}", asset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::math::{precise_unit_int, PRECISE_UNIT};
    use alloy_primitives::Bytes;

    fn addr(n: u8) -> Address {
        Address::with_last_byte(n)
    }

    #[test]
    fn test_batch_transfer_is_atomic() {
        let mut book = BalanceBook::new();
        book.credit(addr(1), addr(10), U256::from(100)).unwrap();

        let legs = [
            Transfer::new(addr(10), addr(1), addr(2), U256::from(60)),
            Transfer::new(addr(10), addr(1), addr(3), U256::from(60)),
        ];
        let err = book.transfer_batch(&legs).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
        assert_eq!(book.balance_of(addr(1), addr(10)), U256::from(100));
        assert_eq!(book.balance_of(addr(2), addr(10)), U256::ZERO);

        book.transfer(legs[0]).unwrap();
        assert_eq!(book.balance_of(addr(2), addr(10)), U256::from(60));
        assert_eq!(book.component_balance(addr(1), addr(10)), U256::from(40));
    }

    #[test]
    fn test_valuation_in_master_and_other_quote() {
        let usdc = addr(0xCC);
        let weth = addr(0xEE);
        let wbtc = addr(0xBB);

        let mut valuer = ComponentValuer::new(usdc);
        valuer.set_asset(usdc, PRECISE_UNIT, 6);
        valuer.set_asset(weth, U256::from(2_000u64) * PRECISE_UNIT, 18);
        valuer.set_asset(wbtc, U256::from(40_000u64) * PRECISE_UNIT, 8);

        // 0.5 WETH + 0.01 WBTC per basket token
        let half_weth = I256::from_raw(PRECISE_UNIT / U256::from(2));
        let cent_wbtc = I256::unchecked_from(1_000_000);
        let token = MatrixToken::new(
            addr(0xF0),
            "Blue Chip",
            "BLUE",
            addr(0xAA),
            &[weth, wbtc],
            &[half_weth, cent_wbtc],
            &[],
        )
        .unwrap();

        let usd = valuer.valuation(&token, usdc).unwrap();
        assert_eq!(usd, U256::from(1_400u64) * PRECISE_UNIT);

        let in_weth = valuer.valuation(&token, weth).unwrap();
        assert_eq!(in_weth, U256::from(7u64) * PRECISE_UNIT / U256::from(10));
    }

    #[test]
    fn test_debt_component_nets_against_equity() {
        let usdc = addr(0xCC);
        let weth = addr(0xEE);
        let lender = addr(0xB5);

        let mut valuer = ComponentValuer::new(usdc);
        valuer.set_asset(usdc, PRECISE_UNIT, 6);
        valuer.set_asset(weth, U256::from(2_000u64) * PRECISE_UNIT, 18);

        // 0.5 WETH long, 500 USDC borrowed per token
        let half_weth = I256::from_raw(PRECISE_UNIT / U256::from(2));
        let mut token = MatrixToken::new(
            addr(0xF0),
            "Levered",
            "LEV",
            addr(0xAA),
            &[weth],
            &[half_weth],
            &[],
        )
        .unwrap();
        token
            .edit_external_position(addr(0xAA), usdc, lender, I256::unchecked_from(-500_000_000), Bytes::new())
            .unwrap();

        let usd = valuer.valuation(&token, usdc).unwrap();
        assert_eq!(usd, U256::from(500u64) * PRECISE_UNIT);

        // WETH at 900 leaves 450 of equity against 500 of debt
        valuer.set_price(weth, U256::from(900u64) * PRECISE_UNIT);
        let err = valuer.valuation(&token, usdc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValuationUnavailable);
    }

    #[test]
    fn test_missing_price_is_unavailable() {
        let valuer = ComponentValuer::new(addr(0xCC));
        let token = MatrixToken::new(
            addr(0xF0),
            "X",
            "X",
            addr(0xAA),
            &[addr(1)],
            &[precise_unit_int()],
            &[],
        )
        .unwrap();

        let err = valuer.valuation(&token, addr(0xCC)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValuationUnavailable);
    }
}
