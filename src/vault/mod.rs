//! External collaborators of the engine
//!
//! The engine moves balances of a vault share token and registers
//! delegations with a delegatee registry. Both are consumed only through the
//! traits below; `PrizeVault` is an in-memory implementation of both.

pub mod permit;
pub mod prize_vault;

pub use permit::{domain_separator, permit_digest, sign_permit, PermitSignature};
pub use prize_vault::PrizeVault;

use crate::address::Address;
use crate::error::VaultError;

/// A fungible vault share token
pub trait VaultToken {
    fn address(&self) -> Address;
    fn decimals(&self) -> u8;
    fn balance_of(&self, who: &Address) -> u128;
    fn allowance(&self, owner: &Address, spender: &Address) -> u128;
    fn approve(&mut self, owner: Address, spender: Address, amount: u128)
        -> Result<(), VaultError>;
    /// Move `amount` out of `from`, acting as `from`
    fn transfer(&mut self, from: Address, to: Address, amount: u128) -> Result<(), VaultError>;
    /// Move `amount` out of `from`, acting as `spender` against an allowance
    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<(), VaultError>;
    fn nonces(&self, owner: &Address) -> u64;
    fn domain_separator(&self) -> [u8; 32];
    /// Redeem an off-chain signed approval of `value` from `owner` to `spender`
    fn permit(
        &mut self,
        owner: Address,
        spender: Address,
        value: u128,
        signature: &PermitSignature,
        now: u64,
    ) -> Result<(), VaultError>;
}

/// Records who each account delegates its chance-weighted balance to
pub trait DelegateeRegistry {
    fn delegate(&mut self, vault: Address, from: Address, to: Address) -> Result<(), VaultError>;
    /// The account itself when it never delegated
    fn delegate_of(&self, vault: &Address, account: &Address) -> Address;
    /// Sum of balances delegated to `account`
    fn delegate_balance_of(&self, vault: &Address, account: &Address) -> u128;
}

/// Everything the engine needs from its collaborators. The engine snapshots
/// the whole collaborator state for all-or-nothing batches, hence `Clone`.
pub trait Vault: VaultToken + DelegateeRegistry + Clone + Send + Sync + 'static {}

impl<T> Vault for T where T: VaultToken + DelegateeRegistry + Clone + Send + Sync + 'static {}
