//! Persistent ledger records stored in RocksDB.
//!
//! Each piece of `LedgerState` is a JSON record under its own prefixed key so
//! stores can be inspected and migrated record by record. A save rewrites the
//! whole keyspace in one write batch.

use crate::config::StorageConfig;
use crate::errors::StorageError;
use crate::escrow::access::{AccessControl, Role};
use crate::escrow::registry::GameRegistry;
use crate::escrow::state::{LedgerState, CURRENT_SCHEMA_VERSION};
use crate::escrow::types::{
    Address, Amount, DepositRecord, GameConfig, GlobalStats, PlayerStats, SessionId, SessionRecord,
    SessionState,
};
use crate::storage::OptimizedStorage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

const KEYSPACE_PREFIX: &str = "escrow:";
const META_KEY: &str = "escrow:meta";
const GAME_PREFIX: &str = "escrow:game:";
const SESSION_PREFIX: &str = "escrow:session:";
const DEPOSIT_PREFIX: &str = "escrow:deposit:";
const PENDING_PREFIX: &str = "escrow:pending:";
const PLAYER_PREFIX: &str = "escrow:player:";
const ROLE_PREFIX: &str = "escrow:role:";

/// Engine-wide fields stored under `escrow:meta`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMeta {
    pub schema_version: u32,
    pub custody: Address,
    pub treasury: Address,
    pub burn_sink: Address,
    pub paused: bool,
    #[serde(default)]
    pub rate_limit_interval_secs: u64,
    #[serde(default)]
    pub authorized_upgrade: Option<u32>,
    pub global_stats: GlobalStats,
    pub total_pending_payouts: Amount,
}

/// Session record layout before refund/sweep accounting existed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacySessionV1 {
    pub owning_game: Address,
    pub prize_pool: Amount,
    pub total_paid: Amount,
    pub state: SessionState,
    pub created_at: u64,
    #[serde(default)]
    pub settled_at: Option<u64>,
}

impl From<LegacySessionV1> for SessionRecord {
    fn from(v1: LegacySessionV1) -> Self {
        SessionRecord {
            owning_game: v1.owning_game,
            prize_pool: v1.prize_pool,
            total_paid: v1.total_paid,
            refunded_total: 0,
            swept: 0,
            state: v1.state,
            payout_credited: v1.total_paid > 0,
            created_at: v1.created_at,
            settled_at: v1.settled_at,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub sessions_upgraded: usize,
    pub sessions_unchanged: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.from_version == self.to_version
    }
}

fn game_key(game: &Address) -> Vec<u8> {
    format!("{}{}", GAME_PREFIX, game.to_hex()).into_bytes()
}

fn session_key(id: &SessionId) -> Vec<u8> {
    format!("{}{}", SESSION_PREFIX, id.to_hex()).into_bytes()
}

fn deposit_key(id: &SessionId, player: &Address) -> Vec<u8> {
    format!("{}{}:{}", DEPOSIT_PREFIX, id.to_hex(), player.to_hex()).into_bytes()
}

fn pending_key(player: &Address) -> Vec<u8> {
    format!("{}{}", PENDING_PREFIX, player.to_hex()).into_bytes()
}

fn player_key(player: &Address) -> Vec<u8> {
    format!("{}{}", PLAYER_PREFIX, player.to_hex()).into_bytes()
}

fn role_key(role: Role, account: &Address) -> Vec<u8> {
    format!("{}{}:{}", ROLE_PREFIX, role.as_str(), account.to_hex()).into_bytes()
}

fn encode<T: Serialize>(what: &str, value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to encode {}: {}", what, e)))
}

fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| {
        StorageError::CorruptedData(format!(
            "Failed to decode {}: {}",
            String::from_utf8_lossy(key),
            e
        ))
    })
}

/// Key with `prefix` removed, split on `:`
fn key_parts<'a>(key: &'a [u8], prefix: &str) -> Result<Vec<&'a str>, StorageError> {
    let text = std::str::from_utf8(key)
        .map_err(|_| StorageError::CorruptedData("Non-UTF-8 key".to_string()))?;
    let rest = text.strip_prefix(prefix).ok_or_else(|| {
        StorageError::CorruptedData(format!("Key {} outside prefix {}", text, prefix))
    })?;
    Ok(rest.split(':').collect())
}

fn parse_id<T: FromStr<Err = String>>(part: &str) -> Result<T, StorageError> {
    part.parse()
        .map_err(|e| StorageError::CorruptedData(format!("Bad id '{}' in key: {}", part, e)))
}

fn parse_role(part: &str) -> Result<Role, StorageError> {
    Role::ALL
        .iter()
        .copied()
        .find(|r| r.as_str() == part)
        .ok_or_else(|| StorageError::CorruptedData(format!("Unknown role '{}'", part)))
}

fn expect_parts<'a>(key: &'a [u8], prefix: &str, count: usize) -> Result<Vec<&'a str>, StorageError> {
    let parts = key_parts(key, prefix)?;
    if parts.len() != count {
        return Err(StorageError::CorruptedData(format!(
            "Malformed key {}",
            String::from_utf8_lossy(key)
        )));
    }
    Ok(parts)
}

#[derive(Clone)]
pub struct LedgerStore {
    storage: OptimizedStorage,
}

impl LedgerStore {
    pub fn new(storage: OptimizedStorage) -> Self {
        Self { storage }
    }

    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        Ok(Self::new(OptimizedStorage::new_with_config(config)?))
    }

    pub fn storage(&self) -> &OptimizedStorage {
        &self.storage
    }

    pub fn load_meta(&self) -> Result<Option<StoredMeta>, StorageError> {
        match self.storage.get(META_KEY.as_bytes())? {
            Some(bytes) => Ok(Some(decode(META_KEY.as_bytes(), &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StorageError> {
        Ok(self.load_meta()?.map(|m| m.schema_version))
    }

    /// Replace everything stored with `state`, atomically
    pub fn save(&self, state: &LedgerState) -> Result<(), StorageError> {
        let mut records: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        let meta = StoredMeta {
            schema_version: state.schema_version,
            custody: state.custody,
            treasury: state.treasury,
            burn_sink: state.burn_sink,
            paused: state.paused,
            rate_limit_interval_secs: state.rate_limit_interval_secs,
            authorized_upgrade: None,
            global_stats: state.global_stats,
            total_pending_payouts: state.total_pending,
        };
        records.insert(META_KEY.as_bytes().to_vec(), encode("meta", &meta)?);

        for (game, config) in state.registry.iter() {
            records.insert(game_key(game), encode("game config", config)?);
        }
        for (id, session) in &state.sessions {
            records.insert(session_key(id), encode("session", session)?);
        }
        for ((id, player), deposit) in &state.deposits {
            records.insert(deposit_key(id, player), encode("deposit", deposit)?);
        }
        for (player, amount) in &state.pending {
            records.insert(pending_key(player), encode("pending payout", amount)?);
        }
        for (player, stats) in &state.player_stats {
            records.insert(player_key(player), encode("player stats", stats)?);
        }
        for role in Role::ALL {
            for account in state.roles.members(role) {
                records.insert(role_key(role, account), Vec::new());
            }
        }
        // Withdrawn balances and revoked roles leave stale keys
        let stale: Vec<Vec<u8>> = self
            .storage
            .keys_with_prefix(KEYSPACE_PREFIX.as_bytes())?
            .into_iter()
            .filter(|key| !records.contains_key(key))
            .collect();

        let puts: Vec<(Vec<u8>, Vec<u8>)> = records.into_iter().collect();
        self.storage.batch_write(&puts, &stale)?;

        tracing::debug!(
            records = puts.len(),
            removed = stale.len(),
            sessions = state.sessions.len(),
            total_pending = state.total_pending,
            "Ledger state saved"
        );
        Ok(())
    }

    pub fn load(&self) -> Result<LedgerState, StorageError> {
        let meta = self.load_meta()?.ok_or(StorageError::Empty)?;
        if meta.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                found: meta.schema_version,
                expected: CURRENT_SCHEMA_VERSION,
            });
        }

        let mut registry = GameRegistry::default();
        for (key, bytes) in self.storage.scan_prefix(GAME_PREFIX.as_bytes())? {
            let parts = expect_parts(&key, GAME_PREFIX, 1)?;
            let game: Address = parse_id(parts[0])?;
            let config: GameConfig = decode(&key, &bytes)?;
            registry.register(game, config).map_err(|e| {
                StorageError::CorruptedData(format!("Stored config for game {} rejected: {}", game, e))
            })?;
        }

        let mut sessions = BTreeMap::new();
        for (key, bytes) in self.storage.scan_prefix(SESSION_PREFIX.as_bytes())? {
            let parts = expect_parts(&key, SESSION_PREFIX, 1)?;
            let id: SessionId = parse_id(parts[0])?;
            let session: SessionRecord = decode(&key, &bytes)?;
            sessions.insert(id, session);
        }

        let mut deposits = BTreeMap::new();
        for (key, bytes) in self.storage.scan_prefix(DEPOSIT_PREFIX.as_bytes())? {
            let parts = expect_parts(&key, DEPOSIT_PREFIX, 2)?;
            let id: SessionId = parse_id(parts[0])?;
            let player: Address = parse_id(parts[1])?;
            let deposit: DepositRecord = decode(&key, &bytes)?;
            deposits.insert((id, player), deposit);
        }

        let mut pending = BTreeMap::new();
        for (key, bytes) in self.storage.scan_prefix(PENDING_PREFIX.as_bytes())? {
            let parts = expect_parts(&key, PENDING_PREFIX, 1)?;
            let player: Address = parse_id(parts[0])?;
            let amount: Amount = decode(&key, &bytes)?;
            pending.insert(player, amount);
        }

        let mut player_stats = BTreeMap::new();
        for (key, bytes) in self.storage.scan_prefix(PLAYER_PREFIX.as_bytes())? {
            let parts = expect_parts(&key, PLAYER_PREFIX, 1)?;
            let player: Address = parse_id(parts[0])?;
            let stats: PlayerStats = decode(&key, &bytes)?;
            player_stats.insert(player, stats);
        }

        let mut roles = AccessControl::default();
        for key in self.storage.keys_with_prefix(ROLE_PREFIX.as_bytes())? {
            let parts = expect_parts(&key, ROLE_PREFIX, 2)?;
            let role = parse_role(parts[0])?;
            let account: Address = parse_id(parts[1])?;
            roles.insert(role, account);
        }

        let mut active_sessions: BTreeMap<Address, BTreeSet<SessionId>> = BTreeMap::new();
        for (id, session) in &sessions {
            if session.state == SessionState::Active {
                active_sessions.entry(session.owning_game).or_default().insert(*id);
            }
        }

        tracing::info!(
            games = registry.len(),
            sessions = sessions.len(),
            pending_players = pending.len(),
            "Ledger state loaded"
        );

        Ok(LedgerState {
            schema_version: meta.schema_version,
            custody: meta.custody,
            treasury: meta.treasury,
            burn_sink: meta.burn_sink,
            paused: meta.paused,
            rate_limit_interval_secs: meta.rate_limit_interval_secs,
            roles,
            registry,
            sessions,
            deposits,
            pending,
            total_pending: meta.total_pending_payouts,
            player_stats,
            global_stats: meta.global_stats,
            active_sessions,
        })
    }

    /// Record that `caller`, a global admin in the stored role table, approves
    /// migrating the stored ledger to `target`
    pub fn authorize_upgrade(&self, caller: Address, target: u32) -> Result<(), StorageError> {
        let mut meta = self.load_meta()?.ok_or(StorageError::Empty)?;
        let current = meta.schema_version;
        if target <= current || target > CURRENT_SCHEMA_VERSION {
            return Err(StorageError::InvalidUpgradeTarget {
                current,
                target,
                latest: CURRENT_SCHEMA_VERSION,
            });
        }
        if self.storage.get(&role_key(Role::GlobalAdmin, &caller))?.is_none() {
            return Err(StorageError::NotGlobalAdmin(caller));
        }

        meta.authorized_upgrade = Some(target);
        self.storage.put(META_KEY.as_bytes(), &encode("meta", &meta)?)?;
        tracing::warn!(current, target, caller = %caller, "Schema upgrade authorized");
        Ok(())
    }

    /// Upgrade a stored ledger to `CURRENT_SCHEMA_VERSION` while no engine is
    /// running against it. Requires a prior `authorize_upgrade` unless `force`.
    pub fn migrate(&self, force: bool) -> Result<MigrationReport, StorageError> {
        let mut meta = self.load_meta()?.ok_or(StorageError::Empty)?;
        let from = meta.schema_version;

        if from == CURRENT_SCHEMA_VERSION {
            tracing::info!(version = from, "Schema already current, nothing to migrate");
            return Ok(MigrationReport {
                from_version: from,
                to_version: from,
                ..Default::default()
            });
        }
        if from != 1 {
            return Err(StorageError::SchemaMismatch {
                found: from,
                expected: CURRENT_SCHEMA_VERSION,
            });
        }
        if meta.authorized_upgrade != Some(CURRENT_SCHEMA_VERSION) && !force {
            return Err(StorageError::UpgradeNotAuthorized {
                from,
                to: CURRENT_SCHEMA_VERSION,
            });
        }
        if force {
            tracing::warn!(from, to = CURRENT_SCHEMA_VERSION, "Forcing unauthorized schema migration");
        }

        let mut report = MigrationReport {
            from_version: from,
            to_version: CURRENT_SCHEMA_VERSION,
            ..Default::default()
        };
        let mut puts: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();

        for (key, bytes) in self.storage.scan_prefix(SESSION_PREFIX.as_bytes())? {
            // Records written by a current build are left alone
            if serde_json::from_slice::<SessionRecord>(&bytes).is_ok() {
                report.sessions_unchanged += 1;
                continue;
            }
            let legacy: LegacySessionV1 = decode(&key, &bytes)?;
            let upgraded = SessionRecord::from(legacy);
            puts.push((key, encode("session", &upgraded)?));
            report.sessions_upgraded += 1;
        }

        meta.schema_version = CURRENT_SCHEMA_VERSION;
        meta.authorized_upgrade = None;
        puts.push((META_KEY.as_bytes().to_vec(), encode("meta", &meta)?));
        self.storage.batch_write(&puts, &[])?;

        tracing::info!(
            from,
            to = CURRENT_SCHEMA_VERSION,
            upgraded = report.sessions_upgraded,
            unchanged = report.sessions_unchanged,
            "Schema migration complete"
        );
        Ok(report)
    }
}
