//! Events emitted by the engine on every committed state change
//!
//! Each event carries enough to rebuild the stake ledger and every
//! delegation account balance from the event stream alone.

use serde::{Deserialize, Serialize};

use crate::address::Address;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DelegatorEvent {
    /// Vault shares moved from `caller` into stake owned by `delegator`
    Staked {
        delegator: Address,
        #[serde(with = "crate::amount")]
        amount: u128,
        caller: Address,
    },
    /// Stake burned from `delegator`, shares released to `recipient`
    Unstaked {
        delegator: Address,
        recipient: Address,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
    DelegationCreated {
        delegator: Address,
        slot: u64,
        account: Address,
        delegatee: Address,
        lock_until: u64,
        caller: Address,
    },
    DelegateeUpdated {
        delegator: Address,
        slot: u64,
        account: Address,
        delegatee: Address,
        lock_until: u64,
        caller: Address,
    },
    /// Shares moved straight from `caller` to the account
    DelegationFunded {
        delegator: Address,
        slot: u64,
        account: Address,
        #[serde(with = "crate::amount")]
        amount: u128,
        caller: Address,
    },
    DelegationFundedFromStake {
        delegator: Address,
        slot: u64,
        account: Address,
        #[serde(with = "crate::amount")]
        amount: u128,
        caller: Address,
    },
    WithdrewDelegationToStake {
        delegator: Address,
        slot: u64,
        account: Address,
        #[serde(with = "crate::amount")]
        amount: u128,
        caller: Address,
    },
    TransferredDelegation {
        delegator: Address,
        slot: u64,
        account: Address,
        #[serde(with = "crate::amount")]
        amount: u128,
        recipient: Address,
    },
    RepresentativeSet {
        delegator: Address,
        representative: Address,
        enabled: bool,
    },
}

impl DelegatorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DelegatorEvent::Staked { .. } => "staked",
            DelegatorEvent::Unstaked { .. } => "unstaked",
            DelegatorEvent::DelegationCreated { .. } => "delegation_created",
            DelegatorEvent::DelegateeUpdated { .. } => "delegatee_updated",
            DelegatorEvent::DelegationFunded { .. } => "delegation_funded",
            DelegatorEvent::DelegationFundedFromStake { .. } => "delegation_funded_from_stake",
            DelegatorEvent::WithdrewDelegationToStake { .. } => "withdrew_delegation_to_stake",
            DelegatorEvent::TransferredDelegation { .. } => "transferred_delegation",
            DelegatorEvent::RepresentativeSet { .. } => "representative_set",
        }
    }

    /// The delegator whose holdings this event touches
    pub fn delegator(&self) -> Address {
        match self {
            DelegatorEvent::Staked { delegator, .. }
            | DelegatorEvent::Unstaked { delegator, .. }
            | DelegatorEvent::DelegationCreated { delegator, .. }
            | DelegatorEvent::DelegateeUpdated { delegator, .. }
            | DelegatorEvent::DelegationFunded { delegator, .. }
            | DelegatorEvent::DelegationFundedFromStake { delegator, .. }
            | DelegatorEvent::WithdrewDelegationToStake { delegator, .. }
            | DelegatorEvent::TransferredDelegation { delegator, .. }
            | DelegatorEvent::RepresentativeSet { delegator, .. } => *delegator,
        }
    }
}
