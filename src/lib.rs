//! Wager Escrow - Custody and Settlement for Session-Based Wagering
//!
//! Holds player entry fees for game sessions, splits off rake and burn,
//! tracks prize pools, credits winnings into a pull-based payout ledger and
//! refunds players when a session is cancelled. Authorized game contracts
//! drive the session lifecycle; admins control pauses, quarantine and the
//! treasury destination.

pub mod commit_reveal;
pub mod config;
pub mod errors;
pub mod escrow;
pub mod ledger_store;
pub mod storage;

pub use commit_reveal::{CommitRevealBook, CommitRevealError};
pub use config::{ConfigLoader, EscrowConfig};
pub use errors::{AppError, AppResult, EscrowError, EscrowResult, ErrorKind, StorageError};
pub use escrow::{EscrowEngine, InMemoryLedger, LedgerState, Role, SharedEngine, TokenLedger};
pub use ledger_store::{LedgerStore, MigrationReport};
pub use storage::OptimizedStorage;
