//! Representatives a delegator has approved to manage its delegations

use std::collections::{HashMap, HashSet};

use crate::address::Address;
use crate::error::{DelegatorError, DelegatorResult};

#[derive(Debug, Clone, Default)]
pub struct RepresentativeRegistry {
    representatives: HashMap<Address, HashSet<Address>>,
}

impl RepresentativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approve or revoke `representative` for `delegator`. Callers must only
    /// ever pass the acting account as `delegator`.
    pub fn set(
        &mut self,
        delegator: Address,
        representative: Address,
        enabled: bool,
    ) -> DelegatorResult<()> {
        if representative.is_zero() {
            return Err(DelegatorError::RepresentativeRequired);
        }
        if enabled {
            self.representatives
                .entry(delegator)
                .or_default()
                .insert(representative);
        } else if let Some(set) = self.representatives.get_mut(&delegator) {
            set.remove(&representative);
            if set.is_empty() {
                self.representatives.remove(&delegator);
            }
        }
        Ok(())
    }

    pub fn is_representative(&self, delegator: &Address, representative: &Address) -> bool {
        self.representatives
            .get(delegator)
            .is_some_and(|set| set.contains(representative))
    }

    /// Fail unless `caller` is `delegator` or one of its representatives
    pub fn require_delegator_or_representative(
        &self,
        caller: &Address,
        delegator: &Address,
    ) -> DelegatorResult<()> {
        if caller == delegator || self.is_representative(delegator, caller) {
            return Ok(());
        }
        Err(DelegatorError::NotAuthorized {
            caller: *caller,
            delegator: *delegator,
        })
    }
}
