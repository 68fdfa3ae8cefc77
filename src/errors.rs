//! Error types for the escrow engine and its supporting layers
//!
//! Every engine failure is a distinct named condition so integrators can
//! branch on identity. `ErrorKind` groups them into the broad categories
//! callers usually care about (who may retry, who must fix input).

use crate::escrow::access::Role;
use crate::escrow::token::TransferError;
use crate::escrow::types::{Address, SessionId};
use std::fmt;

/// Broad category of an engine failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller is unknown, paused, or lacks the required role
    Authorization,
    /// Input was malformed or out of bounds; resubmit with corrected input
    Validation,
    /// Session or refund state forbids the call
    State,
    /// The call would overdraw a pool or deposit
    Solvency,
    /// An external token transfer failed
    Transfer,
    /// Arithmetic overflow or guard violations
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Authorization => "authorization",
            ErrorKind::Validation => "validation",
            ErrorKind::State => "state",
            ErrorKind::Solvency => "solvency",
            ErrorKind::Transfer => "transfer",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscrowError {
    // Authorization
    #[error("Game not registered: {0}")]
    GameNotRegistered(Address),

    #[error("Game is paused: {0}")]
    GamePaused(Address),

    #[error("Engine is globally paused")]
    GlobalPaused,

    #[error("Session {session} is owned by {owner}, not {caller}")]
    SessionGameMismatch {
        session: SessionId,
        owner: Address,
        caller: Address,
    },

    #[error("Caller {caller} lacks role {role}")]
    Unauthorized { caller: Address, role: Role },

    #[error("Player {0} is not alive according to the position oracle")]
    PositionRequired(Address),

    #[error("Player {player} rate limited until {retry_at}")]
    RateLimited { player: Address, retry_at: u64 },

    // Validation
    #[error("Entry amount {amount} outside [{min}, {max}] (max 0 = unbounded)")]
    InvalidEntryAmount { amount: u128, min: u128, max: u128 },

    #[error("Fee basis points out of range: {0}")]
    InvalidFeeBps(u16),

    #[error("Entry bounds invalid: min {min} > max {max}")]
    InvalidEntryBounds { min: u128, max: u128 },

    #[error("Null address not allowed")]
    InvalidAddress,

    #[error("Game already registered: {0}")]
    GameAlreadyRegistered(Address),

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Batch is empty")]
    EmptyBatch,

    #[error("Batch too large: {size} items (max {max})")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Batch arrays have mismatched lengths")]
    ArrayLengthMismatch,

    // State
    #[error("Session not active: {0}")]
    SessionNotActive(SessionId),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Session not refundable: {0}")]
    SessionNotRefundable(SessionId),

    #[error("Refunds blocked: payouts already credited on session {0}")]
    RefundsBlockedAfterPayout(SessionId),

    #[error("Player {player} already refunded on session {session}")]
    AlreadyRefunded { session: SessionId, player: Address },

    #[error("Player {player} has no deposit on session {session}")]
    NothingToRefund { session: SessionId, player: Address },

    #[error("No pending payout for {0}")]
    NoPendingPayout(Address),

    // Solvency
    #[error("Payout {requested} exceeds remaining prize pool {available}")]
    PayoutExceedsPrizePool { requested: u128, available: u128 },

    #[error("Refund {requested} exceeds remaining deposit {available}")]
    RefundExceedsDeposit { requested: u128, available: u128 },

    // Transfer
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    // Internal
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    #[error("Reentrant call rejected")]
    ReentrantCall,

    #[error("Engine lock poisoned")]
    LockPoisoned,
}

impl EscrowError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        use EscrowError::*;
        match self {
            GameNotRegistered(_)
            | GamePaused(_)
            | GlobalPaused
            | SessionGameMismatch { .. }
            | Unauthorized { .. }
            | PositionRequired(_)
            | RateLimited { .. } => ErrorKind::Authorization,
            InvalidEntryAmount { .. }
            | InvalidFeeBps(_)
            | InvalidEntryBounds { .. }
            | InvalidAddress
            | GameAlreadyRegistered(_)
            | ZeroAmount
            | EmptyBatch
            | BatchTooLarge { .. }
            | ArrayLengthMismatch => ErrorKind::Validation,
            SessionNotActive(_)
            | SessionNotFound(_)
            | SessionNotRefundable(_)
            | RefundsBlockedAfterPayout(_)
            | AlreadyRefunded { .. }
            | NothingToRefund { .. }
            | NoPendingPayout(_) => ErrorKind::State,
            PayoutExceedsPrizePool { .. } | RefundExceedsDeposit { .. } => ErrorKind::Solvency,
            Transfer(_) => ErrorKind::Transfer,
            ArithmeticOverflow | ReentrantCall | LockPoisoned => ErrorKind::Internal,
        }
    }
}

pub type EscrowResult<T> = Result<T, EscrowError>;

/// Storage system errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Schema version mismatch: found {found}, expected {expected}")]
    SchemaMismatch { found: u32, expected: u32 },

    #[error("No ledger state stored")]
    Empty,

    #[error("Upgrade from schema {from} to {to} has not been authorized")]
    UpgradeNotAuthorized { from: u32, to: u32 },

    #[error("Upgrade target {target} invalid (current {current}, latest {latest})")]
    InvalidUpgradeTarget { current: u32, target: u32, latest: u32 },

    #[error("{0} is not a global admin of the stored ledger")]
    NotGlobalAdmin(Address),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

/// Configuration and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

/// Root error type for the binary and the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Escrow error: {0}")]
    Escrow(#[from] EscrowError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
