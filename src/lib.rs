//! Slot delegator - staked vault shares split across time-locked delegation slots

pub mod address;
pub mod amount;
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod delegation;
pub mod error;
pub mod store;
pub mod vault;
pub mod websocket;

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::auth::LoginChallenges;
use crate::delegation::DelegationEngine;

pub use crate::address::Address;
pub use crate::api::router;

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<DelegationEngine>,
    pub store: store::Store,
    pub challenges: LoginChallenges,
}

impl AppState {
    pub fn new(pool: SqlitePool, engine: Arc<DelegationEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            store: store::Store::new(pool),
            challenges: LoginChallenges::new(),
        })
    }
}
