//! Batched calls
//!
//! A batch runs its calls in order under a single caller identity. Every
//! call sees the effects of the ones before it, and a failing call rolls the
//! whole batch back, collaborator balances included.

use serde::{Deserialize, Serialize};

use super::engine::EngineState;
use crate::address::Address;
use crate::config::MAX_BATCH_CALLS;
use crate::error::{DelegatorError, DelegatorResult};
use crate::vault::{PermitSignature, Vault};

/// One engine operation as it appears inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Call {
    Stake {
        to: Address,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
    Unstake {
        to: Address,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
    CreateDelegation {
        delegator: Address,
        slot: u64,
        delegatee: Address,
        #[serde(default)]
        lock_duration: u64,
    },
    UpdateDelegatee {
        delegator: Address,
        slot: u64,
        delegatee: Address,
        #[serde(default)]
        lock_duration: u64,
    },
    FundDelegation {
        delegator: Address,
        slot: u64,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
    FundDelegationFromStake {
        delegator: Address,
        slot: u64,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
    WithdrawDelegationToStake {
        delegator: Address,
        slot: u64,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
    TransferDelegationTo {
        delegator: Address,
        slot: u64,
        #[serde(with = "crate::amount")]
        amount: u128,
        to: Address,
    },
    SetRepresentative {
        representative: Address,
        enabled: bool,
    },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::Stake { .. } => "stake",
            Call::Unstake { .. } => "unstake",
            Call::CreateDelegation { .. } => "create_delegation",
            Call::UpdateDelegatee { .. } => "update_delegatee",
            Call::FundDelegation { .. } => "fund_delegation",
            Call::FundDelegationFromStake { .. } => "fund_delegation_from_stake",
            Call::WithdrawDelegationToStake { .. } => "withdraw_delegation_to_stake",
            Call::TransferDelegationTo { .. } => "transfer_delegation_to",
            Call::SetRepresentative { .. } => "set_representative",
        }
    }
}

/// Result of one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallOutput {
    Done,
    /// The delegation account the call acted on
    Account { account: Address },
}

/// Full copy of engine state, restorable after a failed batch
pub struct Checkpoint<V: Vault> {
    snapshot: EngineState<V>,
}

impl<V: Vault> Checkpoint<V> {
    pub fn take(state: &EngineState<V>) -> Self {
        Self {
            snapshot: state.clone(),
        }
    }

    pub fn restore(self, state: &mut EngineState<V>) {
        *state = self.snapshot;
    }
}

fn require_batch_len(calls: &[Call]) -> DelegatorResult<()> {
    if calls.len() > MAX_BATCH_CALLS {
        return Err(DelegatorError::BatchTooLarge {
            len: calls.len(),
            max: MAX_BATCH_CALLS,
        });
    }
    Ok(())
}

impl<V: Vault> EngineState<V> {
    pub fn apply(&mut self, caller: Address, call: Call, now: u64) -> DelegatorResult<CallOutput> {
        let account = match call {
            Call::Stake { to, amount } => {
                self.stake(caller, to, amount)?;
                return Ok(CallOutput::Done);
            }
            Call::Unstake { to, amount } => {
                self.unstake(caller, to, amount)?;
                return Ok(CallOutput::Done);
            }
            Call::SetRepresentative {
                representative,
                enabled,
            } => {
                self.set_representative(caller, representative, enabled)?;
                return Ok(CallOutput::Done);
            }
            Call::CreateDelegation {
                delegator,
                slot,
                delegatee,
                lock_duration,
            } => self.create_delegation(caller, delegator, slot, delegatee, lock_duration, now)?,
            Call::UpdateDelegatee {
                delegator,
                slot,
                delegatee,
                lock_duration,
            } => self.update_delegatee(caller, delegator, slot, delegatee, lock_duration, now)?,
            Call::FundDelegation {
                delegator,
                slot,
                amount,
            } => self.fund_delegation(caller, delegator, slot, amount)?,
            Call::FundDelegationFromStake {
                delegator,
                slot,
                amount,
            } => self.fund_delegation_from_stake(caller, delegator, slot, amount)?,
            Call::WithdrawDelegationToStake {
                delegator,
                slot,
                amount,
            } => self.withdraw_delegation_to_stake(caller, delegator, slot, amount, now)?,
            Call::TransferDelegationTo {
                delegator,
                slot,
                amount,
                to,
            } => self.transfer_delegation_to(caller, delegator, slot, amount, to, now)?,
        };
        Ok(CallOutput::Account { account })
    }

    /// Apply `calls` in order; on failure restore the state as it was on entry
    pub fn multicall(
        &mut self,
        caller: Address,
        calls: Vec<Call>,
        now: u64,
    ) -> DelegatorResult<Vec<CallOutput>> {
        require_batch_len(&calls)?;
        let checkpoint = Checkpoint::take(self);
        let result = self.run_calls(caller, calls, now);
        if result.is_err() {
            checkpoint.restore(self);
        }
        result
    }

    /// Redeem `permit` as an approval of `amount` from `caller` to the engine,
    /// then apply `calls`. The permit is rolled back with the calls.
    pub fn permit_and_multicall(
        &mut self,
        caller: Address,
        amount: u128,
        permit: &PermitSignature,
        calls: Vec<Call>,
        now: u64,
    ) -> DelegatorResult<Vec<CallOutput>> {
        require_batch_len(&calls)?;
        let checkpoint = Checkpoint::take(self);
        let engine = self.address;
        let result = self
            .vault
            .permit(caller, engine, amount, permit, now)
            .map_err(DelegatorError::from)
            .and_then(|_| self.run_calls(caller, calls, now));
        if result.is_err() {
            checkpoint.restore(self);
        }
        result
    }

    fn run_calls(
        &mut self,
        caller: Address,
        calls: Vec<Call>,
        now: u64,
    ) -> DelegatorResult<Vec<CallOutput>> {
        let mut outputs = Vec::with_capacity(calls.len());
        for (index, call) in calls.into_iter().enumerate() {
            let name = call.name();
            match self.apply(caller, call, now) {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    tracing::debug!(index, call = name, code = e.code(), "batch call failed");
                    return Err(e);
                }
            }
        }
        Ok(outputs)
    }
}
