//! MatrixToken - the per-basket position ledger
//!
//! Holds the ordered component list, default and external position units
//! (virtual), the position multiplier, the basket token's own holder balances
//! and the per-token state of every attached module.
//!
//! All mutation goes through module-or-manager guarded methods. Composite
//! operations run inside [`MatrixToken::atomically`] so a failure part-way
//! through leaves the ledger exactly as it was.

use alloy_primitives::{Address, Bytes, I256, U256};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::address_set::AddressSet;
use super::position::{
    calculate_default_edit_position_unit, ComponentPosition, ExternalPosition, Position,
    PositionState,
};
use crate::error::{ArithmeticError, MatrixError, MatrixResult};
use crate::external::{BalanceSource, ModuleAuthority};
use crate::math::{
    precise_unit_int, to_uint256, PreciseUnitMath, SignedPreciseMath,
};
use crate::modules::{FeeState, IssuanceSettings, NavIssuanceSettings};

/// Lifecycle of a module attached to a basket token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModuleState {
    /// Added by the manager, not yet initialized by the module
    Pending,
    Initialized,
}

/// Which slot of [`ModuleData`] a module owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModuleSlot {
    StreamingFee,
    Issuance,
    NavIssuance,
}

/// Per-token state owned by the modules
#[derive(Debug, Clone, Default)]
pub(crate) struct ModuleData {
    pub(crate) fee_state: Option<FeeState>,
    pub(crate) issuance_settings: Option<IssuanceSettings>,
    pub(crate) nav_settings: Option<NavIssuanceSettings>,
    owners: BTreeMap<Address, ModuleSlot>,
}

impl ModuleData {
    pub(crate) fn claim(&mut self, module: Address, slot: ModuleSlot) {
        self.owners.insert(module, slot);
    }

    /// Drop whatever state `module` registered
    fn release(&mut self, module: &Address) {
        match self.owners.remove(module) {
            Some(ModuleSlot::StreamingFee) => self.fee_state = None,
            Some(ModuleSlot::Issuance) => self.issuance_settings = None,
            Some(ModuleSlot::NavIssuance) => self.nav_settings = None,
            None => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatrixToken {
    address: Address,
    name: String,
    symbol: String,
    manager: Address,
    modules: BTreeMap<Address, ModuleState>,
    components: AddressSet,
    positions: HashMap<Address, ComponentPosition>,
    position_multiplier: I256,
    total_supply: U256,
    balances: HashMap<Address, U256>,
    pub(crate) module_data: ModuleData,
}

impl MatrixToken {
    /// Create a basket with the given components at the given real units.
    /// The multiplier starts at one precise unit, so virtual == real.
    pub fn new(
        address: Address,
        name: impl Into<String>,
        symbol: impl Into<String>,
        manager: Address,
        components: &[Address],
        units: &[I256],
        modules: &[Address],
    ) -> MatrixResult<Self> {
        if manager == Address::ZERO {
            return Err(MatrixError::invalid("manager must not be the zero address"));
        }
        if components.len() != units.len() {
            return Err(MatrixError::invalid("component and unit lengths must match"));
        }

        let mut token = Self {
            address,
            name: name.into(),
            symbol: symbol.into(),
            manager,
            modules: modules.iter().map(|m| (*m, ModuleState::Pending)).collect(),
            components: AddressSet::new(),
            positions: HashMap::new(),
            position_multiplier: precise_unit_int(),
            total_supply: U256::ZERO,
            balances: HashMap::new(),
            module_data: ModuleData::default(),
        };

        for (component, unit) in components.iter().zip(units) {
            if *component == Address::ZERO {
                return Err(MatrixError::invalid("component must not be the zero address"));
            }
            if *unit <= I256::ZERO {
                return Err(MatrixError::invalid("initial units must be positive"));
            }
            if !token.components.insert(*component) {
                return Err(MatrixError::invalid(format!("duplicate component {}", component)));
            }
            token.positions.insert(
                *component,
                ComponentPosition {
                    virtual_unit: *unit,
                    ..Default::default()
                },
            );
        }

        Ok(token)
    }

    // ============================================
    // BASIC GETTERS
    // ============================================

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn manager(&self) -> Address {
        self.manager
    }

    pub fn position_multiplier(&self) -> I256 {
        self.position_multiplier
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    pub fn balance_of(&self, holder: &Address) -> U256 {
        self.balances.get(holder).copied().unwrap_or(U256::ZERO)
    }

    pub fn fee_state(&self) -> Option<&FeeState> {
        self.module_data.fee_state.as_ref()
    }

    pub fn issuance_settings(&self) -> Option<&IssuanceSettings> {
        self.module_data.issuance_settings.as_ref()
    }

    pub fn nav_settings(&self) -> Option<&NavIssuanceSettings> {
        self.module_data.nav_settings.as_ref()
    }

    // ============================================
    // MODULE LIFECYCLE + AUTHORIZATION
    // ============================================

    pub fn module_state(&self, module: &Address) -> Option<ModuleState> {
        self.modules.get(module).copied()
    }

    pub fn modules(&self) -> Vec<Address> {
        self.modules
            .iter()
            .filter(|(_, state)| **state == ModuleState::Initialized)
            .map(|(module, _)| *module)
            .collect()
    }

    pub fn is_initialized_module(&self, module: &Address) -> bool {
        self.module_state(module) == Some(ModuleState::Initialized)
    }

    pub fn ensure_manager(&self, caller: Address) -> MatrixResult<()> {
        if caller != self.manager {
            return Err(MatrixError::Unauthorized { caller });
        }
        Ok(())
    }

    pub fn ensure_module(&self, caller: Address) -> MatrixResult<()> {
        if !self.is_initialized_module(&caller) {
            return Err(MatrixError::Unauthorized { caller });
        }
        Ok(())
    }

    /// Position edits accept an initialized module or the manager
    pub fn ensure_authorized(&self, caller: Address) -> MatrixResult<()> {
        if !self.is_authorized_module(self.address, caller) {
            return Err(MatrixError::Unauthorized { caller });
        }
        Ok(())
    }

    pub fn add_module(&mut self, caller: Address, module: Address) -> MatrixResult<()> {
        self.ensure_manager(caller)?;
        if self.modules.contains_key(&module) {
            return Err(MatrixError::invalid(format!("module {} already added", module)));
        }
        self.modules.insert(module, ModuleState::Pending);
        debug!("Module {} added to {} (pending)", module, self.symbol);
        Ok(())
    }

    /// Called by the module itself once its per-token state is in place
    pub fn initialize_module(&mut self, caller: Address) -> MatrixResult<()> {
        match self.modules.get_mut(&caller) {
            Some(state) if *state == ModuleState::Pending => {
                *state = ModuleState::Initialized;
                info!("Module {} initialized on {}", caller, self.symbol);
                Ok(())
            }
            _ => Err(MatrixError::Unauthorized { caller }),
        }
    }

    pub fn remove_module(&mut self, caller: Address, module: Address) -> MatrixResult<()> {
        self.ensure_manager(caller)?;
        if self.modules.remove(&module).is_none() {
            return Err(MatrixError::invalid(format!("module {} not attached", module)));
        }
        self.module_data.release(&module);
        debug!("Module {} removed from {}", module, self.symbol);
        Ok(())
    }

    pub fn set_manager(&mut self, caller: Address, new_manager: Address) -> MatrixResult<()> {
        self.ensure_manager(caller)?;
        if new_manager == Address::ZERO {
            return Err(MatrixError::invalid("manager must not be the zero address"));
        }
        self.manager = new_manager;
        Ok(())
    }

    // ============================================
    // POSITION QUERIES
    // ============================================

    pub fn components(&self) -> &[Address] {
        self.components.as_slice()
    }

    pub fn is_component(&self, component: &Address) -> bool {
        self.components.contains(component)
    }

    pub fn get_external_position_modules(&self, component: &Address) -> Vec<Address> {
        self.positions
            .get(component)
            .map(|p| p.external_modules.as_slice().to_vec())
            .unwrap_or_default()
    }

    pub fn is_external_position_module(&self, component: &Address, module: &Address) -> bool {
        self.positions
            .get(component)
            .map(|p| p.external_modules.contains(module))
            .unwrap_or(false)
    }

    pub fn get_default_position_virtual_unit(&self, component: &Address) -> I256 {
        self.positions
            .get(component)
            .map(|p| p.virtual_unit)
            .unwrap_or(I256::ZERO)
    }

    pub fn get_external_position_virtual_unit(&self, component: &Address, module: &Address) -> I256 {
        self.positions
            .get(component)
            .map(|p| p.external_virtual_unit(module))
            .unwrap_or(I256::ZERO)
    }

    pub fn get_external_position_data(&self, component: &Address, module: &Address) -> Bytes {
        self.positions
            .get(component)
            .and_then(|p| p.external_positions.get(module))
            .map(|p| p.data.clone())
            .unwrap_or_default()
    }

    /// Default virtual unit scaled by the multiplier (truncating); 0 for unknown components
    pub fn get_default_position_real_unit(&self, component: &Address) -> MatrixResult<I256> {
        self.convert_virtual_to_real_unit(self.get_default_position_virtual_unit(component))
    }

    pub fn get_external_position_real_unit(
        &self,
        component: &Address,
        module: &Address,
    ) -> MatrixResult<I256> {
        self.convert_virtual_to_real_unit(self.get_external_position_virtual_unit(component, module))
    }

    /// Default real unit plus every external real unit of the component
    pub fn get_total_component_real_units(&self, component: &Address) -> MatrixResult<I256> {
        let mut total = self.get_default_position_real_unit(component)?;
        for module in self.get_external_position_modules(component) {
            let unit = self.get_external_position_real_unit(component, &module)?;
            total = total.checked_add(unit).ok_or(ArithmeticError::Overflow)?;
        }
        Ok(total)
    }

    /// Every position, flattened, in component order (default first)
    pub fn get_positions(&self) -> MatrixResult<Vec<Position>> {
        let mut positions = Vec::new();

        for component in self.components.iter() {
            let Some(entry) = self.positions.get(component) else {
                continue;
            };

            if !entry.virtual_unit.is_zero() {
                positions.push(Position {
                    component: *component,
                    module: Address::ZERO,
                    unit: self.convert_virtual_to_real_unit(entry.virtual_unit)?,
                    state: PositionState::Default,
                    data: Bytes::new(),
                });
            }

            for module in entry.external_modules.iter() {
                let external = entry.external_positions.get(module).cloned().unwrap_or_default();
                positions.push(Position {
                    component: *component,
                    module: *module,
                    unit: self.convert_virtual_to_real_unit(external.virtual_unit)?,
                    state: PositionState::External,
                    data: external.data,
                });
            }
        }

        Ok(positions)
    }

    /// Balance the ledger expects the basket to hold for a default position
    pub fn get_default_tracked_balance(&self, component: &Address) -> MatrixResult<U256> {
        let unit = to_uint256(self.get_default_position_real_unit(component)?)?;
        Ok(self.total_supply.precise_mul(unit)?)
    }

    pub fn has_default_position(&self, component: &Address) -> bool {
        self.get_default_position_virtual_unit(component) > I256::ZERO
    }

    pub fn has_external_position(&self, component: &Address) -> bool {
        self.positions
            .get(component)
            .map(|p| p.has_external_positions())
            .unwrap_or(false)
    }

    pub fn has_sufficient_default_units(&self, component: &Address, unit: U256) -> MatrixResult<bool> {
        let real = to_uint256(self.get_default_position_real_unit(component)?.max(I256::ZERO))?;
        Ok(real >= unit)
    }

    pub fn has_sufficient_external_units(
        &self,
        component: &Address,
        module: &Address,
        unit: U256,
    ) -> MatrixResult<bool> {
        let real = self.get_external_position_real_unit(component, module)?;
        Ok(to_uint256(real.max(I256::ZERO))? >= unit)
    }

    // ============================================
    // REAL <-> VIRTUAL
    // ============================================

    pub fn convert_virtual_to_real_unit(&self, virtual_unit: I256) -> MatrixResult<I256> {
        Ok(virtual_unit.precise_mul(self.position_multiplier)?)
    }

    /// Floors, and refuses conversions that would lose a positive unit entirely
    pub fn convert_real_to_virtual_unit(&self, real_unit: I256) -> MatrixResult<I256> {
        let virtual_unit = real_unit.precise_div_floor(self.position_multiplier)?;

        if real_unit > I256::ZERO && virtual_unit.is_zero() {
            return Err(MatrixError::invalid("real to virtual unit conversion rounds to zero"));
        }
        if real_unit > I256::ZERO && self.convert_virtual_to_real_unit(virtual_unit)?.is_zero() {
            return Err(MatrixError::invalid("virtual to real unit conversion rounds to zero"));
        }

        Ok(virtual_unit)
    }

    // ============================================
    // POSITION EDITS
    // ============================================

    /// Set a component's default VIRTUAL unit.
    ///
    /// A zero unit with no external positions prunes the component; a nonzero
    /// unit on an untracked component appends it to the component list.
    pub fn edit_default_position(
        &mut self,
        caller: Address,
        component: Address,
        virtual_unit: I256,
    ) -> MatrixResult<()> {
        self.ensure_authorized(caller)?;
        if virtual_unit < I256::ZERO {
            return Err(MatrixError::invalid("default position units cannot be negative"));
        }
        if component == Address::ZERO {
            return Err(MatrixError::invalid("component must not be the zero address"));
        }

        if !virtual_unit.is_zero() && self.components.insert(component) {
            debug!("Component {} appended to {}", component, self.symbol);
        }

        let entry = self.positions.entry(component).or_default();
        entry.virtual_unit = virtual_unit;
        if entry.is_empty() {
            self.prune_component(&component);
        }

        debug!("{} default unit of {} -> {}", self.symbol, component, virtual_unit);
        Ok(())
    }

    /// Set a component's default position from a REAL unit
    pub fn edit_default_position_real_unit(
        &mut self,
        caller: Address,
        component: Address,
        real_unit: I256,
    ) -> MatrixResult<()> {
        self.ensure_authorized(caller)?;
        let virtual_unit = self.convert_real_to_virtual_unit(real_unit)?;
        self.edit_default_position(caller, component, virtual_unit)
    }

    pub fn add_external_position_module(
        &mut self,
        caller: Address,
        component: Address,
        module: Address,
    ) -> MatrixResult<()> {
        self.ensure_authorized(caller)?;
        if !self.is_component(&component) {
            return Err(MatrixError::invalid(format!("{} is not a component", component)));
        }
        let entry = self.positions.entry(component).or_default();
        if !entry.external_modules.insert(module) {
            return Err(MatrixError::invalid(format!("module {} already tracks {}", module, component)));
        }
        entry.external_positions.insert(module, ExternalPosition::default());
        Ok(())
    }

    /// Drop a module's external position; prunes the component if nothing remains
    pub fn remove_external_position_module(
        &mut self,
        caller: Address,
        component: Address,
        module: Address,
    ) -> MatrixResult<()> {
        self.ensure_authorized(caller)?;
        let entry = self
            .positions
            .get_mut(&component)
            .filter(|p| p.external_modules.contains(&module))
            .ok_or_else(|| MatrixError::invalid(format!("module {} does not track {}", module, component)))?;

        entry.external_modules.remove(&module);
        entry.external_positions.remove(&module);
        if entry.is_empty() {
            self.prune_component(&component);
        }
        Ok(())
    }

    pub fn edit_external_position_data(
        &mut self,
        caller: Address,
        component: Address,
        module: Address,
        data: Bytes,
    ) -> MatrixResult<()> {
        self.ensure_authorized(caller)?;
        let external = self
            .positions
            .get_mut(&component)
            .and_then(|p| p.external_positions.get_mut(&module))
            .ok_or_else(|| MatrixError::invalid(format!("module {} does not track {}", module, component)))?;
        external.data = data;
        Ok(())
    }

    /// Set the VIRTUAL unit and data of a (component, module) external position.
    ///
    /// A zero unit clears the position (data must then be empty) and prunes
    /// the component once neither a default nor any external position remains.
    pub fn edit_external_position(
        &mut self,
        caller: Address,
        component: Address,
        module: Address,
        virtual_unit: I256,
        data: Bytes,
    ) -> MatrixResult<()> {
        self.ensure_authorized(caller)?;
        if component == Address::ZERO {
            return Err(MatrixError::invalid("component must not be the zero address"));
        }

        if virtual_unit.is_zero() {
            if !data.is_empty() {
                return Err(MatrixError::invalid("data must be empty when clearing a position"));
            }
            if self.is_external_position_module(&component, &module) {
                self.remove_external_position_module(caller, component, module)?;
            }
            return Ok(());
        }

        self.components.insert(component);
        let entry = self.positions.entry(component).or_default();
        entry.external_modules.insert(module);
        entry
            .external_positions
            .insert(module, ExternalPosition { virtual_unit, data });

        debug!(
            "{} external unit of {} via {} -> {}",
            self.symbol, component, module, virtual_unit
        );
        Ok(())
    }

    fn prune_component(&mut self, component: &Address) {
        self.positions.remove(component);
        if self.components.remove(component) {
            info!("Component {} pruned from {}", component, self.symbol);
        }
    }

    /// Re-derive a default unit from the live balance after a balance-changing action
    ///
    /// Returns (current balance, previous real unit, new real unit).
    pub fn calculate_and_edit_default_position(
        &mut self,
        caller: Address,
        component: Address,
        total_supply: U256,
        previous_balance: U256,
        source: &dyn BalanceSource,
    ) -> MatrixResult<(U256, U256, U256)> {
        self.ensure_authorized(caller)?;

        let current_balance = source.component_balance(self.address, component);
        let position_unit = to_uint256(self.get_default_position_real_unit(&component)?)?;

        let new_unit = if current_balance.is_zero() {
            U256::ZERO
        } else {
            calculate_default_edit_position_unit(
                total_supply,
                previous_balance,
                current_balance,
                position_unit,
            )?
        };

        if new_unit != position_unit {
            let real = crate::math::to_int256(new_unit)?;
            self.edit_default_position_real_unit(caller, component, real)?;
        }

        Ok((current_balance, position_unit, new_unit))
    }

    // ============================================
    // MULTIPLIER
    // ============================================

    pub fn edit_position_multiplier(&mut self, caller: Address, new_multiplier: I256) -> MatrixResult<()> {
        self.ensure_module(caller)?;
        self.validate_new_multiplier(new_multiplier)?;

        debug!(
            "{} position multiplier {} -> {}",
            self.symbol, self.position_multiplier, new_multiplier
        );
        self.position_multiplier = new_multiplier;
        Ok(())
    }

    fn validate_new_multiplier(&self, new_multiplier: I256) -> MatrixResult<()> {
        if new_multiplier <= I256::ZERO {
            return Err(MatrixError::invalid("position multiplier must be positive"));
        }
        if let Some(minimum) = self.positions_abs_minimum_virtual_unit()? {
            if minimum.precise_mul_floor(new_multiplier)? <= I256::ZERO {
                return Err(MatrixError::invalid("new multiplier too small"));
            }
        }
        Ok(())
    }

    fn positions_abs_minimum_virtual_unit(&self) -> MatrixResult<Option<I256>> {
        let mut minimum: Option<I256> = None;

        for entry in self.positions.values() {
            let externals = entry.external_positions.values().map(|p| p.virtual_unit);
            for unit in std::iter::once(entry.virtual_unit).chain(externals) {
                let unit = unit.checked_abs_value()?;
                if unit > I256::ZERO && minimum.map_or(true, |m| unit < m) {
                    minimum = Some(unit);
                }
            }
        }

        Ok(minimum)
    }

    // ============================================
    // SUPPLY
    // ============================================

    pub fn mint(&mut self, caller: Address, to: Address, quantity: U256) -> MatrixResult<()> {
        self.ensure_module(caller)?;
        if to == Address::ZERO {
            return Err(MatrixError::invalid("cannot mint to the zero address"));
        }

        let supply = self
            .total_supply
            .checked_add(quantity)
            .ok_or(ArithmeticError::Overflow)?;
        let balance = self
            .balance_of(&to)
            .checked_add(quantity)
            .ok_or(ArithmeticError::Overflow)?;

        self.total_supply = supply;
        self.balances.insert(to, balance);
        Ok(())
    }

    pub fn burn(&mut self, caller: Address, from: Address, quantity: U256) -> MatrixResult<()> {
        self.ensure_module(caller)?;

        let available = self.balance_of(&from);
        if available < quantity {
            return Err(MatrixError::InsufficientBalance {
                asset: self.address,
                required: quantity,
                available,
            });
        }

        // every holder balance is part of total supply, neither side can underflow
        self.balances.insert(from, available - quantity);
        self.total_supply -= quantity;
        Ok(())
    }

    // ============================================
    // ATOMICITY
    // ============================================

    /// Run a composite operation; on error the ledger is restored to its prior state
    pub fn atomically<T, F>(&mut self, operation: F) -> MatrixResult<T>
    where
        F: FnOnce(&mut Self) -> MatrixResult<T>,
    {
        let snapshot = self.clone();
        match operation(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!("Rolling back {} after failure: {}", self.symbol, e);
                *self = snapshot;
                Err(e)
            }
        }
    }

    pub fn snapshot(&self) -> MatrixResult<MatrixSnapshot> {
        Ok(MatrixSnapshot {
            address: self.address,
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            manager: self.manager,
            position_multiplier: self.position_multiplier,
            total_supply: self.total_supply,
            positions: self.get_positions()?,
        })
    }
}

impl ModuleAuthority for MatrixToken {
    fn is_authorized_module(&self, matrix: Address, caller: Address) -> bool {
        matrix == self.address && (caller == self.manager || self.is_initialized_module(&caller))
    }
}

/// Serializable point-in-time view of a ledger
#[derive(Debug, Clone, Serialize)]
pub struct MatrixSnapshot {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub manager: Address,
    pub position_multiplier: I256,
    pub total_supply: U256,
    pub positions: Vec<Position>,
}
