//! Stake ledger: value a delegator has handed to the engine but not yet
//! assigned to any delegation account

use std::collections::HashMap;

use crate::address::Address;
use crate::error::{DelegatorError, DelegatorResult};

#[derive(Debug, Clone, Default)]
pub struct StakeLedger {
    balances: HashMap<Address, u128>,
    total_supply: u128,
}

impl StakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, who: &Address) -> u128 {
        self.balances.get(who).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    /// Fail unless `from` could burn `amount`
    pub fn require_balance(&self, from: &Address, amount: u128) -> DelegatorResult<()> {
        if amount == 0 {
            return Err(DelegatorError::AmountMustBePositive);
        }
        let balance = self.balance_of(from);
        if balance < amount {
            return Err(DelegatorError::InsufficientBalance {
                account: *from,
                balance,
                needed: amount,
            });
        }
        Ok(())
    }

    pub fn mint(&mut self, to: Address, amount: u128) -> DelegatorResult<()> {
        if amount == 0 {
            return Err(DelegatorError::AmountMustBePositive);
        }
        if to.is_zero() {
            return Err(DelegatorError::RecipientRequired);
        }
        let total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(DelegatorError::Overflow)?;
        let balance = self.balance_of(&to) + amount;
        self.total_supply = total_supply;
        self.balances.insert(to, balance);
        Ok(())
    }

    pub fn burn(&mut self, from: Address, amount: u128) -> DelegatorResult<()> {
        self.require_balance(&from, amount)?;
        let remaining = self.balance_of(&from) - amount;
        if remaining == 0 {
            self.balances.remove(&from);
        } else {
            self.balances.insert(from, remaining);
        }
        self.total_supply -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(label: &str) -> Address {
        Address::derive(&[label.as_bytes()])
    }

    #[test]
    fn test_mint_and_burn() {
        let mut ledger = StakeLedger::new();
        ledger.mint(addr("alice"), 100).unwrap();
        ledger.mint(addr("bob"), 50).unwrap();
        ledger.burn(addr("alice"), 30).unwrap();

        assert_eq!(ledger.balance_of(&addr("alice")), 70);
        assert_eq!(ledger.balance_of(&addr("bob")), 50);
        assert_eq!(ledger.total_supply(), 120);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let mut ledger = StakeLedger::new();
        assert_eq!(
            ledger.mint(addr("alice"), 0),
            Err(DelegatorError::AmountMustBePositive)
        );
        assert_eq!(
            ledger.burn(addr("alice"), 0),
            Err(DelegatorError::AmountMustBePositive)
        );
    }

    #[test]
    fn test_mint_to_zero_rejected() {
        let mut ledger = StakeLedger::new();
        assert_eq!(
            ledger.mint(Address::ZERO, 1),
            Err(DelegatorError::RecipientRequired)
        );
        assert_eq!(ledger.total_supply(), 0);
    }

    #[test]
    fn test_burn_more_than_balance() {
        let mut ledger = StakeLedger::new();
        ledger.mint(addr("alice"), 10).unwrap();
        let err = ledger.burn(addr("alice"), 11).unwrap_err();
        assert_eq!(
            err,
            DelegatorError::InsufficientBalance {
                account: addr("alice"),
                balance: 10,
                needed: 11
            }
        );
        assert_eq!(ledger.balance_of(&addr("alice")), 10);
    }

    #[test]
    fn test_mint_overflow() {
        let mut ledger = StakeLedger::new();
        ledger.mint(addr("alice"), u128::MAX).unwrap();
        assert_eq!(ledger.mint(addr("bob"), 1), Err(DelegatorError::Overflow));
        assert_eq!(ledger.balance_of(&addr("bob")), 0);
    }

    #[test]
    fn test_burn_to_zero() {
        let mut ledger = StakeLedger::new();
        ledger.mint(addr("alice"), 5).unwrap();
        ledger.burn(addr("alice"), 5).unwrap();
        assert_eq!(ledger.balance_of(&addr("alice")), 0);
        assert_eq!(ledger.total_supply(), 0);
    }
}
