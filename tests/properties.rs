//! Ledger-wide properties and worked scenarios, driven through the public API

use alloy_primitives::{Address, I256, U256};
use proptest::prelude::*;

use matrix::external::{BalanceBook, ValuationSource};
use matrix::math::{precise_unit_int, to_int256, PreciseUnitMath, UnsignedPreciseMath, PRECISE_UNIT};
use matrix::modules::{
    calculate_accrued_fee, calculate_inflation_amount, FeeState, IssuanceModule, IssuanceSettings,
    NavIssuanceModule, NavIssuanceSettings, ProtocolFeeSchedule, StreamingFeeModule, SECONDS_PER_YEAR,
};
use matrix::{MatrixResult, MatrixToken};

const MANAGER: u8 = 0xAA;
const ALICE: u8 = 0xA1;
const MINTER: u8 = 0xB9;
const FEE_MODULE: u8 = 0xB1;
const ISSUANCE_MODULE: u8 = 0xB2;
const NAV_MODULE: u8 = 0xB3;
const MATRIX: u8 = 0xF0;

fn addr(n: u8) -> Address {
    Address::with_last_byte(n)
}

fn e18(n: u64) -> U256 {
    U256::from(n) * PRECISE_UNIT
}

fn fee_token(module: &StreamingFeeModule, rate: U256, supply: U256) -> MatrixToken {
    let mut token = MatrixToken::new(
        addr(MATRIX),
        "Fee Matrix",
        "FEE",
        addr(MANAGER),
        &[addr(1)],
        &[precise_unit_int()],
        &[module.address(), addr(MINTER)],
    )
    .unwrap();
    token.initialize_module(addr(MINTER)).unwrap();
    token.mint(addr(MINTER), addr(ALICE), supply).unwrap();
    module
        .initialize(
            &mut token,
            addr(MANAGER),
            FeeState {
                fee_recipient: addr(0xD1),
                max_streaming_fee_percentage: U256::from(100_000_000_000_000_000u64),
                streaming_fee_percentage: rate,
                last_streaming_fee_timestamp: 0,
            },
            0,
        )
        .unwrap();
    token
}

// ============================================
// PROPERTIES
// ============================================

proptest! {
    #[test]
    fn prop_precise_mul_div_inverse(a in 0u128..u128::MAX, b in 1_000_000_000_000_000_000u128..1_000_000_000_000_000_000_000_000u128) {
        let a = U256::from(a);
        let b = U256::from(b);
        let back = a.precise_mul(b).unwrap().precise_div(b).unwrap();
        // floor twice with b >= 1: at most one unit lost
        prop_assert!(back <= a);
        prop_assert!(a - back <= U256::from(1u64));
    }

    #[test]
    fn prop_ceil_never_below_floor(a in 1u128..u128::MAX, b in 1u128..u128::MAX) {
        let a = U256::from(a);
        let b = U256::from(b);
        prop_assert!(a.precise_mul_ceil(b).unwrap() >= a.precise_mul(b).unwrap());
        prop_assert!(a.precise_div_ceil(b).unwrap() >= a.precise_div(b).unwrap());
    }

    #[test]
    fn prop_fee_accrual_is_idempotent(
        rate in 0u64..=100_000_000_000_000_000u64,
        elapsed in 0u64..=5 * SECONDS_PER_YEAR,
        supply in 1u128..1_000_000_000_000_000_000_000_000_000u128,
    ) {
        let module = StreamingFeeModule::new(addr(FEE_MODULE), &ProtocolFeeSchedule::default());
        let mut token = fee_token(&module, U256::from(rate), U256::from(supply));

        module.actualize_fee(&mut token, elapsed).unwrap();
        let supply_after = token.total_supply();
        let multiplier_after = token.position_multiplier();

        let again = module.actualize_fee(&mut token, elapsed).unwrap();
        prop_assert!(again.fee_quantity.is_zero());
        prop_assert_eq!(token.total_supply(), supply_after);
        prop_assert_eq!(token.position_multiplier(), multiplier_after);
        prop_assert_eq!(token.fee_state().unwrap().last_streaming_fee_timestamp, elapsed);
    }

    #[test]
    fn prop_multiplier_never_increases_under_fees(
        rate in 0u64..=100_000_000_000_000_000u64,
        steps in prop::collection::vec(0u64..=SECONDS_PER_YEAR, 1..10),
    ) {
        let module = StreamingFeeModule::new(addr(FEE_MODULE), &ProtocolFeeSchedule::default());
        let mut token = fee_token(&module, U256::from(rate), e18(1_000));

        let mut now = 0u64;
        let mut previous = token.position_multiplier();
        for step in steps {
            now += step;
            module.actualize_fee(&mut token, now).unwrap();
            prop_assert!(token.position_multiplier() <= previous);
            previous = token.position_multiplier();
        }
    }

    #[test]
    fn prop_component_holdings_cover_tracked_units(
        units in prop::collection::vec(1u128..=100_000_000_000_000_000_000u128, 3),
        issued in 1u128..1_000_000_000_000_000_000_000_000u128,
        redeemed_pct in 0u64..=100,
    ) {
        let module = IssuanceModule::new(addr(ISSUANCE_MODULE), &ProtocolFeeSchedule::default());
        let components = [addr(1), addr(2), addr(3)];
        let units: Vec<I256> = units.iter().map(|u| to_int256(U256::from(*u)).unwrap()).collect();

        let mut token = MatrixToken::new(
            addr(MATRIX),
            "Conserved",
            "CNS",
            addr(MANAGER),
            &components,
            &units,
            &[module.address()],
        )
        .unwrap();
        module
            .initialize(
                &mut token,
                addr(MANAGER),
                IssuanceSettings {
                    max_manager_fee: U256::ZERO,
                    manager_issue_fee: U256::ZERO,
                    manager_redeem_fee: U256::ZERO,
                    fee_recipient: addr(0xD1),
                },
            )
            .unwrap();

        let mut book = BalanceBook::new();
        for component in &components {
            book.credit(addr(ALICE), *component, U256::from(u128::MAX)).unwrap();
        }

        let issued = U256::from(issued);
        module.issue(&mut token, &mut book, addr(ALICE), issued, addr(ALICE)).unwrap();

        let redeemed = issued * U256::from(redeemed_pct) / U256::from(100u64);
        if !redeemed.is_zero() {
            module.redeem(&mut token, &mut book, addr(ALICE), redeemed, addr(ALICE)).unwrap();
        }

        let tolerance = U256::from(components.len());
        for component in token.components() {
            let held = book.balance_of(addr(MATRIX), *component);
            let tracked = token.get_default_tracked_balance(component).unwrap();
            prop_assert!(held >= tracked);
            prop_assert!(held - tracked <= tolerance);
        }
    }
}

// ============================================
// WORKED SCENARIOS
// ============================================

#[test]
fn test_precise_math_reference_values() {
    assert_eq!(e18(2).precise_mul(e18(3)).unwrap(), e18(6));
    // 0.5 + 5e-19 rounds up to the next 1e-18
    assert_eq!(
        (PRECISE_UNIT + U256::from(1u64)).precise_div_ceil(e18(2)).unwrap(),
        U256::from(500_000_000_000_000_001u64)
    );
}

#[test]
fn test_half_year_streaming_fee() {
    let state = FeeState {
        fee_recipient: addr(0xD1),
        max_streaming_fee_percentage: U256::from(100_000_000_000_000_000u64),
        streaming_fee_percentage: U256::from(20_000_000_000_000_000u64),
        last_streaming_fee_timestamp: 0,
    };

    let fee = calculate_accrued_fee(&state, SECONDS_PER_YEAR / 2).unwrap();
    assert_eq!(fee, U256::from(10_000_000_000_000_000u64));

    let inflation = calculate_inflation_amount(fee, e18(1_000)).unwrap();
    assert_eq!(inflation, U256::from(10_101_010_101_010_101_010u128));
}

#[test]
fn test_nav_bootstrap_mints_net_deposit() {
    struct UnitNav;
    impl ValuationSource for UnitNav {
        fn valuation(&self, _: &MatrixToken, _: Address) -> MatrixResult<U256> {
            Ok(PRECISE_UNIT)
        }
        fn asset_decimals(&self, _: Address) -> MatrixResult<u8> {
            Ok(18)
        }
    }

    let module = NavIssuanceModule::new(addr(NAV_MODULE), &ProtocolFeeSchedule::default());
    let mut token = MatrixToken::new(
        addr(MATRIX),
        "Fresh",
        "FRS",
        addr(MANAGER),
        &[],
        &[],
        &[module.address()],
    )
    .unwrap();
    module
        .initialize(
            &mut token,
            addr(MANAGER),
            NavIssuanceSettings {
                reserve_assets: vec![addr(1)],
                fee_recipient: addr(0xD1),
                manager_issue_fee: U256::ZERO,
                manager_redeem_fee: U256::ZERO,
                max_manager_fee: U256::ZERO,
                premium_percentage: U256::ZERO,
                max_premium_percentage: U256::ZERO,
                min_matrix_token_supply: PRECISE_UNIT,
            },
        )
        .unwrap();

    let minted = module
        .get_expected_matrix_issue_quantity(&token, &UnitNav, addr(1), U256::from(1_000u64))
        .unwrap();
    assert_eq!(minted, U256::from(1_000u64));
}

#[test]
fn test_pruned_component_reappends_at_end() {
    let (a, b, c) = (addr(1), addr(2), addr(3));
    let mut token = MatrixToken::new(
        addr(MATRIX),
        "Ordered",
        "ORD",
        addr(MANAGER),
        &[a, b, c],
        &[precise_unit_int(), precise_unit_int(), precise_unit_int()],
        &[],
    )
    .unwrap();

    token.edit_default_position(addr(MANAGER), a, I256::ZERO).unwrap();
    assert!(!token.is_component(&a));
    assert_eq!(token.components().len(), 2);

    token.edit_default_position(addr(MANAGER), a, precise_unit_int()).unwrap();
    assert_eq!(token.components().last(), Some(&a));
    assert_eq!(token.components().len(), 3);
}
