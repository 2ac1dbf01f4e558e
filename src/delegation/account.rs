//! Delegation accounts
//!
//! A delegation account holds vault shares at its own address and a lock
//! expiry. It executes a closed set of instructions handed to it by the
//! engine; who may hand it an instruction is decided entirely by the engine.
//!
//! Lock states: an account reads `Locked` while `now < lock_until` and
//! `Unlocked` otherwise. There is no explicit unlock transition.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{DelegatorError, DelegatorResult};
use crate::vault::Vault;

/// Lock state of an instantiated account at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockState {
    Unlocked,
    Locked { until: u64 },
}

/// Everything a delegation account can be told to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Register `delegatee` for this account with the registry
    SetDelegatee { delegatee: Address },
    /// Move vault shares held by this account
    TransferOut { to: Address, amount: u128 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationAccount {
    pub address: Address,
    pub delegator: Address,
    pub slot: u64,
    /// Sole controller of this account
    pub controller: Address,
    lock_until: u64,
    pub created_at: u64,
}

impl DelegationAccount {
    pub(crate) fn new(
        address: Address,
        delegator: Address,
        slot: u64,
        controller: Address,
        lock_until: u64,
        created_at: u64,
    ) -> Self {
        Self {
            address,
            delegator,
            slot,
            controller,
            lock_until,
            created_at,
        }
    }

    pub fn lock_until(&self) -> u64 {
        self.lock_until
    }

    pub fn state(&self, now: u64) -> LockState {
        if now < self.lock_until {
            LockState::Locked {
                until: self.lock_until,
            }
        } else {
            LockState::Unlocked
        }
    }

    pub fn is_locked(&self, now: u64) -> bool {
        matches!(self.state(now), LockState::Locked { .. })
    }

    pub fn require_unlocked(&self, now: u64) -> DelegatorResult<()> {
        match self.state(now) {
            LockState::Unlocked => Ok(()),
            LockState::Locked { until } => Err(DelegatorError::DelegationLocked {
                account: self.address,
                lock_until: until,
            }),
        }
    }

    /// Execute an instruction on an unlocked account
    pub fn execute<V: Vault>(
        &self,
        vault: &mut V,
        instruction: Instruction,
        now: u64,
    ) -> DelegatorResult<()> {
        self.require_unlocked(now)?;
        self.dispatch(vault, instruction)
    }

    /// Re-delegate and optionally re-lock in one step.
    ///
    /// The account must be unlocked on entry. The new lock is only written
    /// once the registry accepted the delegatee.
    pub fn relock_and_delegate<V: Vault>(
        &mut self,
        vault: &mut V,
        delegatee: Address,
        new_lock_until: Option<u64>,
        now: u64,
    ) -> DelegatorResult<()> {
        self.require_unlocked(now)?;
        self.dispatch(vault, Instruction::SetDelegatee { delegatee })?;
        if let Some(lock_until) = new_lock_until {
            self.lock_until = lock_until;
        }
        Ok(())
    }

    /// Execute an instruction regardless of the lock. Only reachable for an
    /// account that is still being created, whose lock it has just set.
    pub(crate) fn dispatch<V: Vault>(
        &self,
        vault: &mut V,
        instruction: Instruction,
    ) -> DelegatorResult<()> {
        match instruction {
            Instruction::SetDelegatee { delegatee } => {
                let vault_address = vault.address();
                vault.delegate(vault_address, self.address, delegatee)?;
            }
            Instruction::TransferOut { to, amount } => {
                vault.transfer(self.address, to, amount)?;
            }
        }
        Ok(())
    }
}
