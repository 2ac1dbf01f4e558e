//! Slot-based delegation of staked vault shares
//!
//! A delegator stakes vault shares with the engine, then splits them across
//! numbered slots. Each (delegator, slot) pair owns one delegation account at
//! a deterministic address, which delegates its chance-weighted balance to a
//! single delegatee and may be time-locked.

pub mod account;
pub mod batch;
pub mod engine;
pub mod events;
pub mod factory;
pub mod ledger;
pub mod replay;
pub mod representative;

pub use account::{DelegationAccount, Instruction, LockState};
pub use batch::{Call, CallOutput, Checkpoint};
pub use engine::{engine_address_for, DelegationEngine, DelegationView, EngineInfo, EngineState};
pub use events::DelegatorEvent;
pub use factory::{predict_address, AccountArena};
pub use ledger::StakeLedger;
pub use replay::LedgerReplay;
pub use representative::RepresentativeRegistry;
