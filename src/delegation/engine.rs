//! Delegation engine
//!
//! `EngineState` owns the stake ledger, the representative registry, the
//! account arena and the vault collaborator, and implements every operation
//! synchronously against `&mut self`. `DelegationEngine` wraps it in a single
//! write lock so each operation is one indivisible unit, then broadcasts the
//! events the operation buffered, in commit order.
//!
//! Single operations perform every fallible step before the first write they
//! cannot undo; batches rely on a [`Checkpoint`](super::batch::Checkpoint).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};

use super::account::Instruction;
use super::batch::{Call, CallOutput};
use super::events::DelegatorEvent;
use super::factory::AccountArena;
use super::ledger::StakeLedger;
use super::representative::RepresentativeRegistry;
use crate::address::Address;
use crate::clock::Clock;
use crate::config::{EngineConfig, MAX_LOCK};
use crate::error::{DelegatorError, DelegatorResult};
use crate::vault::{PermitSignature, PrizeVault, Vault};

/// Read-only view of the delegation account for (delegator, slot)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationView {
    pub account: Address,
    /// The account itself while undelegated
    pub delegatee: Address,
    #[serde(with = "crate::amount")]
    pub balance: u128,
    /// 0 when never created
    pub lock_until: u64,
    pub was_created: bool,
}

/// Address the engine acts under for a given vault
pub fn engine_address_for(vault: &Address) -> Address {
    Address::derive(&[b"slot-delegator", vault.as_bytes()])
}

fn require_positive(amount: u128) -> DelegatorResult<()> {
    if amount == 0 {
        return Err(DelegatorError::AmountMustBePositive);
    }
    Ok(())
}

fn lock_expiry(now: u64, lock_duration: u64) -> DelegatorResult<u64> {
    if lock_duration > MAX_LOCK {
        return Err(DelegatorError::LockTooLong {
            duration: lock_duration,
            max: MAX_LOCK,
        });
    }
    now.checked_add(lock_duration)
        .ok_or(DelegatorError::LockOverflow)
}

#[derive(Debug, Clone)]
pub struct EngineState<V: Vault> {
    pub(crate) address: Address,
    pub(crate) vault: V,
    pub(crate) stake: StakeLedger,
    pub(crate) representatives: RepresentativeRegistry,
    pub(crate) accounts: AccountArena,
    pub(crate) pending: Vec<DelegatorEvent>,
}

impl<V: Vault> EngineState<V> {
    pub fn new(vault: V) -> Self {
        let address = engine_address_for(&vault.address());
        Self {
            address,
            vault,
            stake: StakeLedger::new(),
            representatives: RepresentativeRegistry::new(),
            accounts: AccountArena::new(address),
            pending: Vec::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn vault(&self) -> &V {
        &self.vault
    }

    pub fn vault_mut(&mut self) -> &mut V {
        &mut self.vault
    }

    fn emit(&mut self, event: DelegatorEvent) {
        self.pending.push(event);
    }

    pub(crate) fn take_pending(&mut self) -> Vec<DelegatorEvent> {
        std::mem::take(&mut self.pending)
    }

    pub fn stake(&mut self, caller: Address, to: Address, amount: u128) -> DelegatorResult<()> {
        require_positive(amount)?;
        if to.is_zero() {
            return Err(DelegatorError::RecipientRequired);
        }
        self.vault
            .transfer_from(self.address, caller, self.address, amount)?;
        self.stake.mint(to, amount)?;
        self.emit(DelegatorEvent::Staked {
            delegator: to,
            amount,
            caller,
        });
        Ok(())
    }

    pub fn unstake(&mut self, caller: Address, to: Address, amount: u128) -> DelegatorResult<()> {
        if to.is_zero() {
            return Err(DelegatorError::RecipientRequired);
        }
        self.stake.require_balance(&caller, amount)?;
        self.vault.transfer(self.address, to, amount)?;
        self.stake.burn(caller, amount)?;
        self.emit(DelegatorEvent::Unstaked {
            delegator: caller,
            recipient: to,
            amount,
        });
        Ok(())
    }

    pub fn create_delegation(
        &mut self,
        caller: Address,
        delegator: Address,
        slot: u64,
        delegatee: Address,
        lock_duration: u64,
        now: u64,
    ) -> DelegatorResult<Address> {
        self.representatives
            .require_delegator_or_representative(&caller, &delegator)?;
        if delegatee.is_zero() {
            return Err(DelegatorError::DelegateeRequired);
        }
        let lock_until = lock_expiry(now, lock_duration)?;

        let account = self.accounts.create(delegator, slot, lock_until, now)?;
        // The creating call is the one call allowed to delegate under its own lock.
        account.dispatch(&mut self.vault, Instruction::SetDelegatee { delegatee })?;
        let address = account.address;
        self.accounts.insert(account)?;

        self.emit(DelegatorEvent::DelegationCreated {
            delegator,
            slot,
            account: address,
            delegatee,
            lock_until,
            caller,
        });
        Ok(address)
    }

    pub fn update_delegatee(
        &mut self,
        caller: Address,
        delegator: Address,
        slot: u64,
        delegatee: Address,
        lock_duration: u64,
        now: u64,
    ) -> DelegatorResult<Address> {
        self.representatives
            .require_delegator_or_representative(&caller, &delegator)?;
        if delegatee.is_zero() {
            return Err(DelegatorError::DelegateeRequired);
        }
        let new_lock = match lock_duration {
            0 => None,
            duration => Some(lock_expiry(now, duration)?),
        };

        let address = self.accounts.predict_address(&delegator, slot);
        let account = self.accounts.find_mut(&address)?;
        account.relock_and_delegate(&mut self.vault, delegatee, new_lock, now)?;
        let lock_until = account.lock_until();

        self.emit(DelegatorEvent::DelegateeUpdated {
            delegator,
            slot,
            account: address,
            delegatee,
            lock_until,
            caller,
        });
        Ok(address)
    }

    /// Move shares from `caller` to the account address, created or not
    pub fn fund_delegation(
        &mut self,
        caller: Address,
        delegator: Address,
        slot: u64,
        amount: u128,
    ) -> DelegatorResult<Address> {
        if delegator.is_zero() {
            return Err(DelegatorError::DelegatorRequired);
        }
        require_positive(amount)?;
        let address = self.accounts.predict_address(&delegator, slot);
        if !self.accounts.contains(&address) {
            tracing::warn!(
                %delegator,
                slot,
                %address,
                "funding a delegation that has not been created"
            );
        }
        self.vault
            .transfer_from(self.address, caller, address, amount)?;

        self.emit(DelegatorEvent::DelegationFunded {
            delegator,
            slot,
            account: address,
            amount,
            caller,
        });
        Ok(address)
    }

    pub fn fund_delegation_from_stake(
        &mut self,
        caller: Address,
        delegator: Address,
        slot: u64,
        amount: u128,
    ) -> DelegatorResult<Address> {
        self.representatives
            .require_delegator_or_representative(&caller, &delegator)?;
        self.stake.require_balance(&delegator, amount)?;
        let address = self.accounts.predict_address(&delegator, slot);
        self.vault.transfer(self.address, address, amount)?;
        self.stake.burn(delegator, amount)?;

        self.emit(DelegatorEvent::DelegationFundedFromStake {
            delegator,
            slot,
            account: address,
            amount,
            caller,
        });
        Ok(address)
    }

    pub fn withdraw_delegation_to_stake(
        &mut self,
        caller: Address,
        delegator: Address,
        slot: u64,
        amount: u128,
        now: u64,
    ) -> DelegatorResult<Address> {
        self.representatives
            .require_delegator_or_representative(&caller, &delegator)?;
        require_positive(amount)?;
        let address = self.accounts.predict_address(&delegator, slot);
        let account = self.accounts.find(&address)?;
        account.execute(
            &mut self.vault,
            Instruction::TransferOut {
                to: self.address,
                amount,
            },
            now,
        )?;
        self.stake.mint(delegator, amount)?;

        self.emit(DelegatorEvent::WithdrewDelegationToStake {
            delegator,
            slot,
            account: address,
            amount,
            caller,
        });
        Ok(address)
    }

    /// Owner only: representatives may not move value to a new address
    pub fn transfer_delegation_to(
        &mut self,
        caller: Address,
        delegator: Address,
        slot: u64,
        amount: u128,
        to: Address,
        now: u64,
    ) -> DelegatorResult<Address> {
        if caller != delegator {
            return Err(DelegatorError::NotAuthorized { caller, delegator });
        }
        if to.is_zero() {
            return Err(DelegatorError::RecipientRequired);
        }
        require_positive(amount)?;
        let address = self.accounts.predict_address(&delegator, slot);
        let account = self.accounts.find(&address)?;
        account.execute(&mut self.vault, Instruction::TransferOut { to, amount }, now)?;

        self.emit(DelegatorEvent::TransferredDelegation {
            delegator,
            slot,
            account: address,
            amount,
            recipient: to,
        });
        Ok(address)
    }

    pub fn set_representative(
        &mut self,
        caller: Address,
        representative: Address,
        enabled: bool,
    ) -> DelegatorResult<()> {
        self.representatives.set(caller, representative, enabled)?;
        self.emit(DelegatorEvent::RepresentativeSet {
            delegator: caller,
            representative,
            enabled,
        });
        Ok(())
    }

    pub fn is_representative_of(&self, delegator: &Address, representative: &Address) -> bool {
        self.representatives
            .is_representative(delegator, representative)
    }

    pub fn compute_delegation_address(&self, delegator: &Address, slot: u64) -> Address {
        self.accounts.predict_address(delegator, slot)
    }

    pub fn get_delegation(&self, delegator: &Address, slot: u64) -> DelegationView {
        let account = self.accounts.predict_address(delegator, slot);
        let (lock_until, was_created) = match self.accounts.get(&account) {
            Some(existing) => (existing.lock_until(), true),
            None => (0, false),
        };
        let vault_address = self.vault.address();
        DelegationView {
            account,
            delegatee: self.vault.delegate_of(&vault_address, &account),
            balance: self.vault.balance_of(&account),
            lock_until,
            was_created,
        }
    }

    pub fn balance_of(&self, who: &Address) -> u128 {
        self.stake.balance_of(who)
    }

    pub fn total_supply(&self) -> u128 {
        self.stake.total_supply()
    }
}

/// Engine metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub address: Address,
    pub vault: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub max_lock: u64,
    #[serde(with = "crate::amount")]
    pub total_supply: u128,
}

/// Thread-safe engine shared across connections
pub struct DelegationEngine<V: Vault = PrizeVault> {
    address: Address,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<EngineState<V>>,
    event_tx: broadcast::Sender<DelegatorEvent>,
    journals: Mutex<Vec<mpsc::UnboundedSender<DelegatorEvent>>>,
}

impl<V: Vault> DelegationEngine<V> {
    pub fn new(vault: V, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let state = EngineState::new(vault);
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            address: state.address(),
            config,
            clock,
            state: RwLock::new(state),
            event_tx,
            journals: Mutex::new(Vec::new()),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Subscribe to committed events. Slow subscribers skip events once
    /// `event_capacity` of them are queued.
    pub fn subscribe(&self) -> broadcast::Receiver<DelegatorEvent> {
        self.event_tx.subscribe()
    }

    /// Every event committed from now on, never dropped
    pub async fn journal(&self) -> mpsc::UnboundedReceiver<DelegatorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.journals.lock().await.push(tx);
        rx
    }

    /// Run `op` under the write lock; broadcast its events only if it succeeded
    async fn commit<T>(
        &self,
        name: &'static str,
        op: impl FnOnce(&mut EngineState<V>, u64) -> DelegatorResult<T>,
    ) -> DelegatorResult<T> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let result = op(&mut *state, now);
        let events = state.take_pending();

        match &result {
            Ok(_) => {
                tracing::info!(op = name, events = events.len(), "committed");
                let mut journals = self.journals.lock().await;
                journals.retain(|journal| !journal.is_closed());
                for event in events {
                    for journal in journals.iter() {
                        let _ = journal.send(event.clone());
                    }
                    let _ = self.event_tx.send(event);
                }
            }
            Err(e) => {
                tracing::debug!(op = name, code = e.code(), error = %e, "rejected");
            }
        }
        result
    }

    pub async fn stake(&self, caller: Address, to: Address, amount: u128) -> DelegatorResult<()> {
        self.commit("stake", |s, _| s.stake(caller, to, amount))
            .await
    }

    pub async fn unstake(&self, caller: Address, to: Address, amount: u128) -> DelegatorResult<()> {
        self.commit("unstake", |s, _| s.unstake(caller, to, amount))
            .await
    }

    pub async fn create_delegation(
        &self,
        caller: Address,
        delegator: Address,
        slot: u64,
        delegatee: Address,
        lock_duration: u64,
    ) -> DelegatorResult<Address> {
        self.commit("create_delegation", |s, now| {
            s.create_delegation(caller, delegator, slot, delegatee, lock_duration, now)
        })
        .await
    }

    pub async fn update_delegatee(
        &self,
        caller: Address,
        delegator: Address,
        slot: u64,
        delegatee: Address,
        lock_duration: u64,
    ) -> DelegatorResult<Address> {
        self.commit("update_delegatee", |s, now| {
            s.update_delegatee(caller, delegator, slot, delegatee, lock_duration, now)
        })
        .await
    }

    pub async fn fund_delegation(
        &self,
        caller: Address,
        delegator: Address,
        slot: u64,
        amount: u128,
    ) -> DelegatorResult<Address> {
        self.commit("fund_delegation", |s, _| {
            s.fund_delegation(caller, delegator, slot, amount)
        })
        .await
    }

    pub async fn fund_delegation_from_stake(
        &self,
        caller: Address,
        delegator: Address,
        slot: u64,
        amount: u128,
    ) -> DelegatorResult<Address> {
        self.commit("fund_delegation_from_stake", |s, _| {
            s.fund_delegation_from_stake(caller, delegator, slot, amount)
        })
        .await
    }

    pub async fn withdraw_delegation_to_stake(
        &self,
        caller: Address,
        delegator: Address,
        slot: u64,
        amount: u128,
    ) -> DelegatorResult<Address> {
        self.commit("withdraw_delegation_to_stake", |s, now| {
            s.withdraw_delegation_to_stake(caller, delegator, slot, amount, now)
        })
        .await
    }

    pub async fn transfer_delegation_to(
        &self,
        caller: Address,
        delegator: Address,
        slot: u64,
        amount: u128,
        to: Address,
    ) -> DelegatorResult<Address> {
        self.commit("transfer_delegation_to", |s, now| {
            s.transfer_delegation_to(caller, delegator, slot, amount, to, now)
        })
        .await
    }

    pub async fn set_representative(
        &self,
        caller: Address,
        representative: Address,
        enabled: bool,
    ) -> DelegatorResult<()> {
        self.commit("set_representative", |s, _| {
            s.set_representative(caller, representative, enabled)
        })
        .await
    }

    /// Run one call as `caller`
    pub async fn execute(&self, caller: Address, call: Call) -> DelegatorResult<CallOutput> {
        let name = call.name();
        self.commit(name, |s, now| s.apply(caller, call, now)).await
    }

    /// Run `calls` in order as `caller`; all of them take effect or none do
    pub async fn multicall(
        &self,
        caller: Address,
        calls: Vec<Call>,
    ) -> DelegatorResult<Vec<CallOutput>> {
        self.commit("multicall", |s, now| s.multicall(caller, calls, now))
            .await
    }

    /// Redeem a signed approval of `amount` to the engine, then run `calls`
    pub async fn permit_and_multicall(
        &self,
        caller: Address,
        amount: u128,
        permit: PermitSignature,
        calls: Vec<Call>,
    ) -> DelegatorResult<Vec<CallOutput>> {
        self.commit("permit_and_multicall", |s, now| {
            s.permit_and_multicall(caller, amount, &permit, calls, now)
        })
        .await
    }

    pub async fn get_delegation(&self, delegator: &Address, slot: u64) -> DelegationView {
        self.state.read().await.get_delegation(delegator, slot)
    }

    pub async fn compute_delegation_address(&self, delegator: &Address, slot: u64) -> Address {
        self.state
            .read()
            .await
            .compute_delegation_address(delegator, slot)
    }

    pub async fn is_representative_of(&self, delegator: &Address, representative: &Address) -> bool {
        self.state
            .read()
            .await
            .is_representative_of(delegator, representative)
    }

    /// Stake balance of `who`
    pub async fn balance_of(&self, who: &Address) -> u128 {
        self.state.read().await.balance_of(who)
    }

    pub async fn total_supply(&self) -> u128 {
        self.state.read().await.total_supply()
    }

    pub async fn decimals(&self) -> u8 {
        self.state.read().await.vault().decimals()
    }

    pub async fn info(&self) -> EngineInfo {
        let state = self.state.read().await;
        EngineInfo {
            address: self.address,
            vault: state.vault().address(),
            name: self.config.name.clone(),
            symbol: self.config.symbol.clone(),
            decimals: state.vault().decimals(),
            max_lock: MAX_LOCK,
            total_supply: state.total_supply(),
        }
    }

    /// Read the vault collaborator
    pub async fn with_vault<T>(&self, f: impl FnOnce(&V) -> T) -> T {
        f(self.state.read().await.vault())
    }

    /// Act on the vault collaborator directly, outside any engine operation
    pub async fn with_vault_mut<T>(&self, f: impl FnOnce(&mut V) -> T) -> T {
        f(self.state.write().await.vault_mut())
    }
}
