//! Rebuild engine-level balances from a recorded event stream

use std::collections::{HashMap, HashSet};

use super::events::DelegatorEvent;
use crate::address::Address;

/// Balances and delegation settings as implied by the events applied so far.
///
/// Account balances only count value the engine itself moved. Shares sent to
/// an account address by other means never show up here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerReplay {
    stake: HashMap<Address, u128>,
    accounts: HashMap<Address, u128>,
    delegatees: HashMap<Address, Address>,
    locks: HashMap<Address, u64>,
    representatives: HashSet<(Address, Address)>,
    applied: u64,
}

impl LedgerReplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a DelegatorEvent>) -> Self {
        let mut replay = Self::new();
        for event in events {
            replay.apply(event);
        }
        replay
    }

    pub fn apply(&mut self, event: &DelegatorEvent) {
        match event {
            DelegatorEvent::Staked {
                delegator, amount, ..
            } => credit(&mut self.stake, *delegator, *amount),
            DelegatorEvent::Unstaked {
                delegator, amount, ..
            } => debit(&mut self.stake, *delegator, *amount),
            DelegatorEvent::DelegationCreated {
                account,
                delegatee,
                lock_until,
                ..
            }
            | DelegatorEvent::DelegateeUpdated {
                account,
                delegatee,
                lock_until,
                ..
            } => {
                self.delegatees.insert(*account, *delegatee);
                self.locks.insert(*account, *lock_until);
            }
            DelegatorEvent::DelegationFunded {
                account, amount, ..
            } => credit(&mut self.accounts, *account, *amount),
            DelegatorEvent::DelegationFundedFromStake {
                delegator,
                account,
                amount,
                ..
            } => {
                debit(&mut self.stake, *delegator, *amount);
                credit(&mut self.accounts, *account, *amount);
            }
            DelegatorEvent::WithdrewDelegationToStake {
                delegator,
                account,
                amount,
                ..
            } => {
                debit(&mut self.accounts, *account, *amount);
                credit(&mut self.stake, *delegator, *amount);
            }
            DelegatorEvent::TransferredDelegation {
                account, amount, ..
            } => debit(&mut self.accounts, *account, *amount),
            DelegatorEvent::RepresentativeSet {
                delegator,
                representative,
                enabled,
            } => {
                if *enabled {
                    self.representatives.insert((*delegator, *representative));
                } else {
                    self.representatives.remove(&(*delegator, *representative));
                }
            }
        }
        self.applied += 1;
    }

    pub fn stake_balance(&self, who: &Address) -> u128 {
        self.stake.get(who).copied().unwrap_or(0)
    }

    pub fn total_stake(&self) -> u128 {
        self.stake.values().sum()
    }

    pub fn account_balance(&self, account: &Address) -> u128 {
        self.accounts.get(account).copied().unwrap_or(0)
    }

    pub fn delegatee_of(&self, account: &Address) -> Option<Address> {
        self.delegatees.get(account).copied()
    }

    pub fn lock_until(&self, account: &Address) -> Option<u64> {
        self.locks.get(account).copied()
    }

    pub fn is_representative(&self, delegator: &Address, representative: &Address) -> bool {
        self.representatives.contains(&(*delegator, *representative))
    }

    pub fn events_applied(&self) -> u64 {
        self.applied
    }
}

fn credit(balances: &mut HashMap<Address, u128>, who: Address, amount: u128) {
    let balance = balances.entry(who).or_default();
    *balance = balance.saturating_add(amount);
}

fn debit(balances: &mut HashMap<Address, u128>, who: Address, amount: u128) {
    let Some(balance) = balances.get_mut(&who) else {
        return;
    };
    *balance = balance.saturating_sub(amount);
    if *balance == 0 {
        balances.remove(&who);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(label: &str) -> Address {
        Address::derive(&[label.as_bytes()])
    }

    #[test]
    fn test_replay_stake_and_delegation_flow() {
        let alice = addr("alice");
        let account = addr("account");
        let events = vec![
            DelegatorEvent::Staked {
                delegator: alice,
                amount: 1000,
                caller: alice,
            },
            DelegatorEvent::DelegationCreated {
                delegator: alice,
                slot: 0,
                account,
                delegatee: addr("bob"),
                lock_until: 500,
                caller: alice,
            },
            DelegatorEvent::DelegationFundedFromStake {
                delegator: alice,
                slot: 0,
                account,
                amount: 700,
                caller: alice,
            },
            DelegatorEvent::TransferredDelegation {
                delegator: alice,
                slot: 0,
                account,
                amount: 200,
                recipient: addr("carol"),
            },
            DelegatorEvent::WithdrewDelegationToStake {
                delegator: alice,
                slot: 0,
                account,
                amount: 100,
                caller: alice,
            },
        ];

        let replay = LedgerReplay::from_events(&events);
        assert_eq!(replay.stake_balance(&alice), 400);
        assert_eq!(replay.total_stake(), 400);
        assert_eq!(replay.account_balance(&account), 400);
        assert_eq!(replay.delegatee_of(&account), Some(addr("bob")));
        assert_eq!(replay.lock_until(&account), Some(500));
        assert_eq!(replay.events_applied(), 5);
    }

    #[test]
    fn test_replay_representatives() {
        let mut replay = LedgerReplay::new();
        replay.apply(&DelegatorEvent::RepresentativeSet {
            delegator: addr("alice"),
            representative: addr("rep"),
            enabled: true,
        });
        assert!(replay.is_representative(&addr("alice"), &addr("rep")));

        replay.apply(&DelegatorEvent::RepresentativeSet {
            delegator: addr("alice"),
            representative: addr("rep"),
            enabled: false,
        });
        assert!(!replay.is_representative(&addr("alice"), &addr("rep")));
    }

    #[test]
    fn test_update_replaces_delegatee_and_lock() {
        let account = addr("account");
        let mut replay = LedgerReplay::new();
        replay.apply(&DelegatorEvent::DelegationCreated {
            delegator: addr("alice"),
            slot: 1,
            account,
            delegatee: addr("bob"),
            lock_until: 100,
            caller: addr("alice"),
        });
        replay.apply(&DelegatorEvent::DelegateeUpdated {
            delegator: addr("alice"),
            slot: 1,
            account,
            delegatee: addr("carol"),
            lock_until: 100,
            caller: addr("alice"),
        });
        assert_eq!(replay.delegatee_of(&account), Some(addr("carol")));
        assert_eq!(replay.lock_until(&account), Some(100));
    }
}
