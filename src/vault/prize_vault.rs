//! In-memory prize vault: share token plus delegatee registry
//!
//! Delegated balances are kept current on every share movement and every
//! re-delegation, so `delegate_balance_of` is always the sum of the balances
//! of all accounts whose delegate is the queried account.

use std::collections::HashMap;

use super::permit::{domain_separator, permit_digest, PermitSignature};
use super::{DelegateeRegistry, VaultToken};
use crate::address::Address;
use crate::error::VaultError;

#[derive(Debug, Clone)]
pub struct PrizeVault {
    address: Address,
    decimals: u8,
    total_supply: u128,
    balances: HashMap<Address, u128>,
    allowances: HashMap<(Address, Address), u128>,
    nonces: HashMap<Address, u64>,
    delegates: HashMap<Address, Address>,
    delegate_balances: HashMap<Address, u128>,
}

impl PrizeVault {
    pub fn new(address: Address, decimals: u8) -> Self {
        Self {
            address,
            decimals,
            total_supply: 0,
            balances: HashMap::new(),
            allowances: HashMap::new(),
            nonces: HashMap::new(),
            delegates: HashMap::new(),
            delegate_balances: HashMap::new(),
        }
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    /// Mint shares as if `to` had deposited the underlying asset
    pub fn deposit(&mut self, to: Address, amount: u128) -> Result<(), VaultError> {
        if to.is_zero() {
            return Err(VaultError::ZeroAddress);
        }
        self.total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(VaultError::Overflow)?;
        *self.balances.entry(to).or_default() += amount;
        self.credit_delegate(&to, amount);
        Ok(())
    }

    fn current_delegate(&self, account: &Address) -> Address {
        self.delegates.get(account).copied().unwrap_or(*account)
    }

    fn credit_delegate(&mut self, account: &Address, amount: u128) {
        let delegate = self.current_delegate(account);
        *self.delegate_balances.entry(delegate).or_default() += amount;
    }

    fn debit_delegate(&mut self, account: &Address, amount: u128) {
        let delegate = self.current_delegate(account);
        if let Some(balance) = self.delegate_balances.get_mut(&delegate) {
            *balance = balance.saturating_sub(amount);
        }
    }

    fn move_balance(&mut self, from: Address, to: Address, amount: u128) -> Result<(), VaultError> {
        if to.is_zero() || from.is_zero() {
            return Err(VaultError::ZeroAddress);
        }
        let balance = self.balance_of(&from);
        if balance < amount {
            return Err(VaultError::InsufficientBalance {
                account: from,
                balance,
                needed: amount,
            });
        }
        // Receiver cannot overflow: its balance is bounded by total supply.
        self.balances.insert(from, balance - amount);
        self.debit_delegate(&from, amount);
        *self.balances.entry(to).or_default() += amount;
        self.credit_delegate(&to, amount);
        Ok(())
    }

    fn check_vault(&self, vault: &Address) -> Result<(), VaultError> {
        if *vault != self.address {
            return Err(VaultError::UnknownVault(*vault));
        }
        Ok(())
    }
}

impl VaultToken for PrizeVault {
    fn address(&self) -> Address {
        self.address
    }

    fn decimals(&self) -> u8 {
        self.decimals
    }

    fn balance_of(&self, who: &Address) -> u128 {
        self.balances.get(who).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> u128 {
        self.allowances.get(&(*owner, *spender)).copied().unwrap_or(0)
    }

    fn approve(
        &mut self,
        owner: Address,
        spender: Address,
        amount: u128,
    ) -> Result<(), VaultError> {
        if owner.is_zero() || spender.is_zero() {
            return Err(VaultError::ZeroAddress);
        }
        self.allowances.insert((owner, spender), amount);
        Ok(())
    }

    fn transfer(&mut self, from: Address, to: Address, amount: u128) -> Result<(), VaultError> {
        self.move_balance(from, to, amount)
    }

    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<(), VaultError> {
        let allowance = self.allowance(&from, &spender);
        if allowance < amount {
            return Err(VaultError::InsufficientAllowance {
                owner: from,
                spender,
                allowance,
                needed: amount,
            });
        }
        self.move_balance(from, to, amount)?;
        if allowance != u128::MAX {
            self.allowances.insert((from, spender), allowance - amount);
        }
        Ok(())
    }

    fn nonces(&self, owner: &Address) -> u64 {
        self.nonces.get(owner).copied().unwrap_or(0)
    }

    fn domain_separator(&self) -> [u8; 32] {
        domain_separator(&self.address)
    }

    fn permit(
        &mut self,
        owner: Address,
        spender: Address,
        value: u128,
        signature: &PermitSignature,
        now: u64,
    ) -> Result<(), VaultError> {
        if now > signature.deadline {
            return Err(VaultError::AuthorizationExpired {
                deadline: signature.deadline,
                now,
            });
        }
        let nonce = self.nonces(&owner);
        let digest = permit_digest(
            &self.domain_separator(),
            &owner,
            &spender,
            value,
            nonce,
            signature.deadline,
        );
        if !owner.verify(&digest, &signature.signature) {
            return Err(VaultError::InvalidAuthorization);
        }
        self.approve(owner, spender, value)?;
        self.nonces.insert(owner, nonce + 1);
        Ok(())
    }
}

impl DelegateeRegistry for PrizeVault {
    fn delegate(&mut self, vault: Address, from: Address, to: Address) -> Result<(), VaultError> {
        self.check_vault(&vault)?;
        if to.is_zero() {
            return Err(VaultError::ZeroAddress);
        }
        let balance = self.balance_of(&from);
        self.debit_delegate(&from, balance);
        self.delegates.insert(from, to);
        self.credit_delegate(&from, balance);
        Ok(())
    }

    fn delegate_of(&self, vault: &Address, account: &Address) -> Address {
        if *vault != self.address {
            return *account;
        }
        self.current_delegate(account)
    }

    fn delegate_balance_of(&self, vault: &Address, account: &Address) -> u128 {
        if *vault != self.address {
            return 0;
        }
        self.delegate_balances.get(account).copied().unwrap_or(0)
    }
}
