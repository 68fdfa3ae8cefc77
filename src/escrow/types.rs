use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Token amount in base units
pub type Amount = u128;

/// Basis-point denominator for rake and burn rates
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Maximum items accepted by any batch operation
pub const MAX_BATCH_SIZE: usize = 100;

/// Lifetime wagered/won are kept in units of this many base units
pub const STATS_SCALE: u128 = 1_000_000_000_000;

macro_rules! hex_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Short form keeps log lines readable
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s).map_err(|e| format!("invalid hex: {}", e))?;
                let array: [u8; 32] = bytes
                    .try_into()
                    .map_err(|v: Vec<u8>| format!("expected 32 bytes, got {}", v.len()))?;
                Ok(Self(array))
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_hex()
            }
        }
    };
}

hex_id!(Address, "Opaque 32-byte account identity (games, players, treasury, sinks)");
hex_id!(SessionId, "Opaque 32-byte session identifier chosen by the owning game");

impl Address {
    /// The null destination
    pub const ZERO: Address = Address([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Deterministic address from a human label, handy for tooling and tests
    pub fn from_label(label: &str) -> Self {
        Self(label_hash(b"address:", label))
    }
}

impl SessionId {
    pub fn from_label(label: &str) -> Self {
        Self(label_hash(b"session:", label))
    }
}

fn label_hash(domain: &[u8], label: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(label.as_bytes());
    hasher.finalize().into()
}

/// Per-game fee and entry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    pub min_entry: Amount,
    /// Zero means unbounded
    pub max_entry: Amount,
    pub rake_bps: u16,
    pub burn_bps: u16,
    pub requires_position: bool,
    pub paused: bool,
}

impl GameConfig {
    pub fn new(min_entry: Amount, max_entry: Amount, rake_bps: u16, burn_bps: u16) -> Self {
        Self {
            min_entry,
            max_entry,
            rake_bps,
            burn_bps,
            requires_position: false,
            paused: false,
        }
    }

    pub fn with_position_check(mut self) -> Self {
        self.requires_position = true;
        self
    }
}

/// Session lifecycle. `None` is never stored; it is what a lookup of an
/// unknown id reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    None,
    Active,
    Settled,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Settled | SessionState::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::None => "none",
            SessionState::Active => "active",
            SessionState::Settled => "settled",
            SessionState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Pooled wagering round owned by one game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub owning_game: Address,
    pub prize_pool: Amount,
    /// Payouts plus payout-time burns
    pub total_paid: Amount,
    pub refunded_total: Amount,
    /// Remainder sent to treasury at settlement
    pub swept: Amount,
    pub state: SessionState,
    /// Set by the first successful payout credit; blocks all refunds afterwards
    pub payout_credited: bool,
    pub created_at: u64,
    pub settled_at: Option<u64>,
}

impl SessionRecord {
    pub fn new(owning_game: Address, created_at: u64) -> Self {
        Self {
            owning_game,
            prize_pool: 0,
            total_paid: 0,
            refunded_total: 0,
            swept: 0,
            state: SessionState::Active,
            payout_credited: false,
            created_at,
            settled_at: None,
        }
    }

    /// Funds still held for this session
    pub fn remaining(&self) -> Amount {
        self.prize_pool
            .saturating_sub(self.total_paid)
            .saturating_sub(self.refunded_total)
            .saturating_sub(self.swept)
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

/// A player's stake in one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub gross: Amount,
    /// Post-rake share retained in custody; the refundable figure
    pub net: Amount,
    pub refunded: bool,
}

/// Per-player analytics. Scaled totals are approximate and never used for
/// solvency decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub last_play_time: u64,
    pub total_wagered_scaled: u64,
    pub total_won_scaled: u64,
}

impl PlayerStats {
    pub(crate) fn record_wager(&mut self, gross: Amount, now: u64) {
        self.games_played = self.games_played.saturating_add(1);
        self.last_play_time = now;
        self.total_wagered_scaled = self.total_wagered_scaled.saturating_add(scale_down(gross));
    }

    pub(crate) fn record_result(&mut self, payout: Amount, won: bool) {
        if won {
            self.wins = self.wins.saturating_add(1);
            self.total_won_scaled = self.total_won_scaled.saturating_add(scale_down(payout));
        } else {
            self.losses = self.losses.saturating_add(1);
        }
    }
}

fn scale_down(amount: Amount) -> u64 {
    u64::try_from(amount / STATS_SCALE).unwrap_or(u64::MAX)
}

/// Lifetime engine counters; monotonically non-decreasing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_games_played: u64,
    pub total_volume: Amount,
    pub total_rake_collected: Amount,
    pub total_burned: Amount,
}
