//! Insertion-ordered address set with O(1) membership and O(1) removal
//!
//! Removal swaps the last entry into the vacated slot, so the relative order
//! of the remaining entries is NOT preserved across removals. Re-inserting an
//! address always appends it at the end.

use alloy_primitives::Address;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    items: Vec<Address>,
    index: HashMap<Address, usize>,
}

impl AddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append; returns false if already present
    pub fn insert(&mut self, address: Address) -> bool {
        if self.index.contains_key(&address) {
            return false;
        }
        self.index.insert(address, self.items.len());
        self.items.push(address);
        true
    }

    /// Swap-with-last removal; returns false if absent
    pub fn remove(&mut self, address: &Address) -> bool {
        let Some(position) = self.index.remove(address) else {
            return false;
        };
        self.items.swap_remove(position);
        if let Some(moved) = self.items.get(position) {
            self.index.insert(*moved, position);
        }
        true
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.index.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::with_last_byte(n)
    }

    #[test]
    fn test_insertion_order() {
        let mut set = AddressSet::new();
        assert!(set.insert(addr(1)));
        assert!(set.insert(addr(2)));
        assert!(set.insert(addr(3)));
        assert!(!set.insert(addr(2)));
        assert_eq!(set.as_slice(), &[addr(1), addr(2), addr(3)]);
    }

    #[test]
    fn test_remove_swaps_last_into_slot() {
        let mut set = AddressSet::new();
        for n in 1..=4 {
            set.insert(addr(n));
        }

        assert!(set.remove(&addr(2)));
        assert_eq!(set.as_slice(), &[addr(1), addr(4), addr(3)]);
        assert!(!set.contains(&addr(2)));

        // moved entry is still removable through its new slot
        assert!(set.remove(&addr(4)));
        assert_eq!(set.as_slice(), &[addr(1), addr(3)]);
        assert!(!set.remove(&addr(4)));
    }

    #[test]
    fn test_reinsert_appends() {
        let mut set = AddressSet::new();
        set.insert(addr(1));
        set.insert(addr(2));
        set.insert(addr(3));
        set.remove(&addr(3));
        set.remove(&addr(1));
        set.insert(addr(1));
        assert_eq!(set.as_slice(), &[addr(2), addr(1)]);
    }
}
