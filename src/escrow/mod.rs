pub mod access;
pub mod admin;
pub mod clock;
pub mod engine;
pub mod fees;
pub mod refunds;
pub mod registry;
pub mod shared;
pub mod state;
pub mod token;
pub mod types;

pub use access::{AccessControl, Role};
pub use clock::{Clock, ManualClock, PositionOracle, SystemClock};
pub use engine::EscrowEngine;
pub use fees::FeeSplit;
pub use refunds::BatchRefundOutcome;
pub use registry::GameRegistry;
pub use shared::SharedEngine;
pub use state::{LedgerState, CURRENT_SCHEMA_VERSION};
pub use token::{InMemoryLedger, TokenLedger, Transfer, TransferError};
pub use types::*;
