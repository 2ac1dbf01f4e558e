//! Error types for the engine, its collaborators, and the server

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::address::Address;

/// Failures raised by the vault token or the delegatee registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Insufficient vault balance for {account}: has {balance}, needs {needed}")]
    InsufficientBalance {
        account: Address,
        balance: u128,
        needed: u128,
    },

    #[error("Insufficient allowance from {owner} to {spender}: has {allowance}, needs {needed}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowance: u128,
        needed: u128,
    },

    #[error("Zero address not allowed")]
    ZeroAddress,

    #[error("Unknown vault: {0}")]
    UnknownVault(Address),

    #[error("Authorization expired at {deadline} (now {now})")]
    AuthorizationExpired { deadline: u64, now: u64 },

    #[error("Invalid authorization signature")]
    InvalidAuthorization,

    #[error("Vault arithmetic overflow")]
    Overflow,
}

impl VaultError {
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::InsufficientBalance { .. } => "insufficient_vault_balance",
            VaultError::InsufficientAllowance { .. } => "insufficient_allowance",
            VaultError::ZeroAddress => "zero_address",
            VaultError::UnknownVault(_) => "unknown_vault",
            VaultError::AuthorizationExpired { .. } => "authorization_expired",
            VaultError::InvalidAuthorization => "invalid_authorization",
            VaultError::Overflow => "vault_overflow",
        }
    }
}

/// Failures raised by the delegation engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DelegatorError {
    #[error("Amount must be greater than zero")]
    AmountMustBePositive,

    #[error("Recipient required")]
    RecipientRequired,

    #[error("Delegatee required")]
    DelegateeRequired,

    #[error("Delegator required")]
    DelegatorRequired,

    #[error("Representative required")]
    RepresentativeRequired,

    #[error("Lock duration {duration}s exceeds maximum of {max}s")]
    LockTooLong { duration: u64, max: u64 },

    #[error("Lock expiry overflows the clock")]
    LockOverflow,

    #[error("{caller} is not authorized to act for {delegator}")]
    NotAuthorized { caller: Address, delegator: Address },

    #[error("Delegation {account} is locked until {lock_until}")]
    DelegationLocked { account: Address, lock_until: u64 },

    #[error("Delegation {0} already exists")]
    AlreadyExists(Address),

    #[error("Delegation {0} has not been created")]
    DelegationNotFound(Address),

    #[error("Insufficient stake for {account}: has {balance}, needs {needed}")]
    InsufficientBalance {
        account: Address,
        balance: u128,
        needed: u128,
    },

    #[error("Stake ledger arithmetic overflow")]
    Overflow,

    #[error("Batch of {len} calls exceeds maximum of {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl DelegatorError {
    /// Stable machine-readable code for the violated precondition
    pub fn code(&self) -> &'static str {
        match self {
            DelegatorError::AmountMustBePositive => "amount_must_be_positive",
            DelegatorError::RecipientRequired => "recipient_required",
            DelegatorError::DelegateeRequired => "delegatee_required",
            DelegatorError::DelegatorRequired => "delegator_required",
            DelegatorError::RepresentativeRequired => "representative_required",
            DelegatorError::LockTooLong { .. } => "lock_too_long",
            DelegatorError::LockOverflow => "lock_overflow",
            DelegatorError::NotAuthorized { .. } => "not_authorized",
            DelegatorError::DelegationLocked { .. } => "delegation_locked",
            DelegatorError::AlreadyExists(_) => "already_exists",
            DelegatorError::DelegationNotFound(_) => "delegation_not_found",
            DelegatorError::InsufficientBalance { .. } => "insufficient_balance",
            DelegatorError::Overflow => "overflow",
            DelegatorError::BatchTooLarge { .. } => "batch_too_large",
            DelegatorError::Vault(e) => e.code(),
        }
    }
}

pub type DelegatorResult<T> = std::result::Result<T, DelegatorError>;

/// Server-side errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Delegator(#[from] DelegatorError),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Delegator(e) => e.code(),
            AppError::NotAuthenticated => "not_authenticated",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Delegator(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            AppError::NotAuthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::BadRequest(e) => (StatusCode::BAD_REQUEST, e.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.clone())
            }
        };

        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
