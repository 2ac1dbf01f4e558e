//! Deterministic delegation account addresses and the account arena
//!
//! salt    = sha256(delegator || slot)
//! address = sha256("delegation" || controller || salt)
//!
//! Addresses are recomputed on lookup; only instantiated accounts occupy
//! the arena.

use std::collections::HashMap;

use crate::address::Address;
use crate::error::{DelegatorError, DelegatorResult};

use super::account::DelegationAccount;

pub fn salt(delegator: &Address, slot: u64) -> [u8; 32] {
    Address::derive(&[delegator.as_bytes(), &slot.to_be_bytes()]).to_bytes()
}

/// Address of the account for (delegator, slot) under `controller`
pub fn predict_address(controller: &Address, delegator: &Address, slot: u64) -> Address {
    let salt = salt(delegator, slot);
    Address::derive(&[b"delegation", controller.as_bytes(), &salt])
}

/// Sparse map from derived address to instantiated account
#[derive(Debug, Clone, Default)]
pub struct AccountArena {
    controller: Address,
    accounts: HashMap<Address, DelegationAccount>,
}

impl AccountArena {
    pub fn new(controller: Address) -> Self {
        Self {
            controller,
            accounts: HashMap::new(),
        }
    }

    pub fn predict_address(&self, delegator: &Address, slot: u64) -> Address {
        predict_address(&self.controller, delegator, slot)
    }

    /// Prepare a new account at the predicted address.
    ///
    /// The account is not stored until passed to [`AccountArena::insert`],
    /// so a creation that fails half way leaves nothing behind.
    pub fn create(
        &self,
        delegator: Address,
        slot: u64,
        initial_lock: u64,
        now: u64,
    ) -> DelegatorResult<DelegationAccount> {
        let address = self.predict_address(&delegator, slot);
        if self.accounts.contains_key(&address) {
            return Err(DelegatorError::AlreadyExists(address));
        }
        Ok(DelegationAccount::new(
            address,
            delegator,
            slot,
            self.controller,
            initial_lock,
            now,
        ))
    }

    pub fn insert(&mut self, account: DelegationAccount) -> DelegatorResult<()> {
        if self.accounts.contains_key(&account.address) {
            return Err(DelegatorError::AlreadyExists(account.address));
        }
        self.accounts.insert(account.address, account);
        Ok(())
    }

    pub fn get(&self, address: &Address) -> Option<&DelegationAccount> {
        self.accounts.get(address)
    }

    pub fn get_mut(&mut self, address: &Address) -> Option<&mut DelegationAccount> {
        self.accounts.get_mut(address)
    }

    pub fn find(&self, address: &Address) -> DelegatorResult<&DelegationAccount> {
        self.get(address)
            .ok_or(DelegatorError::DelegationNotFound(*address))
    }

    pub fn find_mut(&mut self, address: &Address) -> DelegatorResult<&mut DelegationAccount> {
        self.accounts
            .get_mut(address)
            .ok_or(DelegatorError::DelegationNotFound(*address))
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
