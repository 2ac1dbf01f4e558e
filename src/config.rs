//! Server and engine configuration

use clap::Parser;

use crate::address::Address;

/// Maximum lock duration: 180 days
pub const MAX_LOCK: u64 = 180 * 24 * 60 * 60;

/// Most calls a single batch may carry
pub const MAX_BATCH_CALLS: usize = 1024;

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Stake token name
    pub name: String,
    /// Stake token symbol
    pub symbol: String,
    /// Capacity of the committed-event broadcast channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "Staked Prize Vault Share".to_string(),
            symbol: "stkPVS".to_string(),
            event_capacity: 256,
        }
    }
}

/// Command-line / environment configuration for the server binary
#[derive(Debug, Clone, Parser)]
#[command(name = "slot-delegator")]
#[command(about = "Slot-based delegation engine for prize vault shares")]
#[command(version)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "DELEGATOR_BIND", default_value = "0.0.0.0:3000")]
    pub bind: String,

    /// SQLite database for the event log
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:delegator.db?mode=rwc")]
    pub database_url: String,

    /// Label the vault address is derived from
    #[arg(long, env = "DELEGATOR_VAULT_LABEL", default_value = "prize-vault")]
    pub vault_label: String,

    /// Decimals of the vault share token
    #[arg(long, env = "DELEGATOR_VAULT_DECIMALS", default_value_t = 18)]
    pub vault_decimals: u8,

    /// Capacity of the event broadcast channel
    #[arg(long, env = "DELEGATOR_EVENT_CAPACITY", default_value_t = 256)]
    pub event_capacity: usize,

    /// Stake token name
    #[arg(long, env = "DELEGATOR_STAKE_NAME", default_value = "Staked Prize Vault Share")]
    pub stake_name: String,

    /// Stake token symbol
    #[arg(long, env = "DELEGATOR_STAKE_SYMBOL", default_value = "stkPVS")]
    pub stake_symbol: String,
}

impl ServerConfig {
    pub fn vault_address(&self) -> Address {
        Address::derive(&[self.vault_label.as_bytes()])
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            name: self.stake_name.clone(),
            symbol: self.stake_symbol.clone(),
            event_capacity: self.event_capacity.max(1),
        }
    }
}
