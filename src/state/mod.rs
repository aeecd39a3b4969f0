//! Ledger state: balances in two layers plus the node-role registry.
//!
//! The chain layer holds balances confirmed by blocks. The pool layer is a
//! per-address credit/debit overlay produced by pending transactions; its
//! balance is the chain balance adjusted by the overlay. The node always
//! reverts the whole pool before touching the chain layer, so the overlay
//! is empty whenever chain balances move.

use serde::{Deserialize, Serialize};

use crate::storage::{StagedMap, StorageResult, Transactional};
use crate::types::{Address, Coin, CoinError, NodeType};

/// Which balance view an operation targets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateLayer {
    /// Speculative balances including pending transactions
    Pool,
    /// Balances confirmed by blocks
    Chain,
}

/// Net pool-layer adjustment of one address
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDelta {
    /// Net amount credited by pending transactions
    pub credit: Coin,
    /// Net amount debited by pending transactions
    pub debit: Coin,
}

impl PoolDelta {
    const fn is_empty(&self) -> bool {
        self.credit.is_zero() && self.debit.is_zero()
    }
}

/// Read-only access to balances and roles
pub trait LedgerView {
    /// Balance of an address in a layer
    fn balance(&self, address: &Address, layer: StateLayer) -> Coin;

    /// Registered role of a node
    fn node_type(&self, address: &Address) -> Option<NodeType>;
}

/// Balances and roles
#[derive(Clone, Debug, Default)]
pub struct LedgerState {
    accounts: StagedMap<Address, Coin>,
    pool: StagedMap<Address, PoolDelta>,
    roles: StagedMap<Address, NodeType>,
}

impl LedgerState {
    /// Assemble from stores
    #[must_use]
    pub const fn new(
        accounts: StagedMap<Address, Coin>,
        pool: StagedMap<Address, PoolDelta>,
        roles: StagedMap<Address, NodeType>,
    ) -> Self {
        Self {
            accounts,
            pool,
            roles,
        }
    }

    /// Balance of an address in a layer
    #[must_use]
    pub fn get_balance(&self, address: &Address, layer: StateLayer) -> Coin {
        let confirmed = self.accounts.get(address).copied().unwrap_or_default();
        if layer == StateLayer::Chain {
            return confirmed;
        }
        let Some(delta) = self.pool.get(address) else {
            return confirmed;
        };
        let total = (confirmed.to_fractions() + delta.credit.to_fractions())
            .saturating_sub(delta.debit.to_fractions());
        Coin::from_fractions(total).unwrap_or(confirmed)
    }

    /// Credit an address
    ///
    /// # Errors
    /// Returns error on overflow
    pub fn increase_balance(
        &mut self,
        address: &Address,
        amount: Coin,
        layer: StateLayer,
    ) -> Result<(), StateError> {
        if amount.is_zero() {
            return Ok(());
        }
        match layer {
            StateLayer::Chain => {
                let balance = self.get_balance(address, StateLayer::Chain);
                self.accounts.insert(*address, balance.checked_add(amount)?);
            }
            StateLayer::Pool => {
                let mut delta = self.pool.get(address).copied().unwrap_or_default();
                if delta.debit >= amount {
                    delta.debit = delta.debit.checked_sub(amount)?;
                } else {
                    delta.credit = delta
                        .credit
                        .checked_add(amount.checked_sub(delta.debit)?)?;
                    delta.debit = Coin::ZERO;
                }
                self.store_delta(address, delta);
            }
        }
        Ok(())
    }

    /// Debit an address
    ///
    /// # Errors
    /// Returns error if the layer balance is lower than `amount`
    pub fn decrease_balance(
        &mut self,
        address: &Address,
        amount: Coin,
        layer: StateLayer,
    ) -> Result<(), StateError> {
        if amount.is_zero() {
            return Ok(());
        }
        let have = self.get_balance(address, layer);
        if have < amount {
            return Err(StateError::InsufficientBalance {
                address: *address,
                have,
                need: amount,
            });
        }
        match layer {
            StateLayer::Chain => {
                let remaining = have.checked_sub(amount)?;
                if remaining.is_zero() {
                    self.accounts.remove(address);
                } else {
                    self.accounts.insert(*address, remaining);
                }
            }
            StateLayer::Pool => {
                let mut delta = self.pool.get(address).copied().unwrap_or_default();
                if delta.credit >= amount {
                    delta.credit = delta.credit.checked_sub(amount)?;
                } else {
                    delta.debit = delta
                        .debit
                        .checked_add(amount.checked_sub(delta.credit)?)?;
                    delta.credit = Coin::ZERO;
                }
                self.store_delta(address, delta);
            }
        }
        Ok(())
    }

    fn store_delta(&mut self, address: &Address, delta: PoolDelta) {
        if delta.is_empty() {
            self.pool.remove(address);
        } else {
            self.pool.insert(*address, delta);
        }
    }

    /// Whether no pending transaction adjusts any balance
    #[must_use]
    pub fn pool_is_clear(&self) -> bool {
        self.pool.is_empty()
    }

    /// Register a node role
    ///
    /// # Errors
    /// Returns error if the node already has a role
    pub fn insert_role(&mut self, address: Address, node_type: NodeType) -> Result<(), StateError> {
        if let Some(existing) = self.roles.get(&address) {
            return Err(StateError::RoleExists {
                address,
                node_type: *existing,
            });
        }
        self.roles.insert(address, node_type);
        Ok(())
    }

    /// Drop a node role
    ///
    /// # Errors
    /// Returns error if the node has no role
    pub fn remove_role(&mut self, address: &Address) -> Result<NodeType, StateError> {
        self.roles
            .remove(address)
            .ok_or(StateError::RoleMissing { address: *address })
    }

    /// Registered role of a node
    #[must_use]
    pub fn get_role(&self, address: &Address) -> Option<NodeType> {
        self.roles.get(address).copied()
    }

    /// Chain-layer accounts with a non-zero balance
    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Coin)> {
        self.accounts.iter()
    }
}

impl LedgerView for LedgerState {
    fn balance(&self, address: &Address, layer: StateLayer) -> Coin {
        self.get_balance(address, layer)
    }

    fn node_type(&self, address: &Address) -> Option<NodeType> {
        self.get_role(address)
    }
}

impl Transactional for LedgerState {
    fn save(&mut self) -> StorageResult<()> {
        self.accounts.save()?;
        self.pool.save()?;
        self.roles.save()
    }

    fn commit(&mut self) {
        self.accounts.commit();
        self.pool.commit();
        self.roles.commit();
    }

    fn discard(&mut self) {
        self.accounts.discard();
        self.pool.discard();
        self.roles.discard();
    }

    fn clear(&mut self) {
        self.accounts.clear();
        self.pool.clear();
        self.roles.clear();
    }
}

/// State errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Insufficient balance
    #[error("insufficient balance of {address}: have {have}, need {need}")]
    InsufficientBalance {
        /// Debited account
        address: Address,
        /// Current balance
        have: Coin,
        /// Amount needed
        need: Coin,
    },
    /// Arithmetic failure
    #[error(transparent)]
    Coin(#[from] CoinError),
    /// Role already registered
    #[error("{address} already has role {node_type:?}")]
    RoleExists {
        /// Node address
        address: Address,
        /// Current role
        node_type: NodeType,
    },
    /// No role to remove
    #[error("{address} has no role")]
    RoleMissing {
        /// Node address
        address: Address,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(n: u8) -> Address {
        Address::from_bytes([n; 32])
    }

    #[test]
    fn test_chain_credit_and_debit() {
        let mut state = LedgerState::default();
        let alice = address(1);

        state
            .increase_balance(&alice, Coin::from_whole(100), StateLayer::Chain)
            .unwrap();
        state
            .decrease_balance(&alice, Coin::from_whole(30), StateLayer::Chain)
            .unwrap();

        assert_eq!(state.get_balance(&alice, StateLayer::Chain), Coin::from_whole(70));
        assert_eq!(state.get_balance(&alice, StateLayer::Pool), Coin::from_whole(70));
    }

    #[test]
    fn test_insufficient_balance() {
        let mut state = LedgerState::default();
        let result = state.decrease_balance(&address(1), Coin::from_whole(1), StateLayer::Chain);
        assert!(matches!(
            result,
            Err(StateError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_pool_layer_overlays_chain() {
        let mut state = LedgerState::default();
        let alice = address(1);
        state
            .increase_balance(&alice, Coin::from_whole(10), StateLayer::Chain)
            .unwrap();

        state
            .decrease_balance(&alice, Coin::from_whole(4), StateLayer::Pool)
            .unwrap();
        assert_eq!(state.get_balance(&alice, StateLayer::Pool), Coin::from_whole(6));
        assert_eq!(state.get_balance(&alice, StateLayer::Chain), Coin::from_whole(10));

        // pool spending is limited by the pool-layer balance
        assert!(state
            .decrease_balance(&alice, Coin::from_whole(7), StateLayer::Pool)
            .is_err());

        state
            .increase_balance(&alice, Coin::from_whole(4), StateLayer::Pool)
            .unwrap();
        assert!(state.pool_is_clear());
    }

    #[test]
    fn test_roles() {
        let mut state = LedgerState::default();
        state.insert_role(address(2), NodeType::Storage).unwrap();
        assert!(state.insert_role(address(2), NodeType::Channel).is_err());
        assert_eq!(state.get_role(&address(2)), Some(NodeType::Storage));
        assert_eq!(state.remove_role(&address(2)).unwrap(), NodeType::Storage);
        assert!(state.remove_role(&address(2)).is_err());
    }

    #[test]
    fn test_discard_restores_balances() {
        let mut state = LedgerState::default();
        let alice = address(1);
        state
            .increase_balance(&alice, Coin::from_whole(5), StateLayer::Chain)
            .unwrap();
        state.commit();

        state
            .decrease_balance(&alice, Coin::from_whole(5), StateLayer::Chain)
            .unwrap();
        state.insert_role(alice, NodeType::Channel).unwrap();
        state.discard();

        assert_eq!(state.get_balance(&alice, StateLayer::Chain), Coin::from_whole(5));
        assert_eq!(state.get_role(&alice), None);
    }
}
