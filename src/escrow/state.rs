//! Everything the engine persists, plus the invariant checker

use crate::escrow::access::AccessControl;
use crate::escrow::registry::GameRegistry;
use crate::escrow::types::{
    Address, Amount, DepositRecord, GlobalStats, PlayerStats, SessionId, SessionRecord,
};
use std::collections::{BTreeMap, BTreeSet};

/// Version of the persisted record layout
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerState {
    pub schema_version: u32,
    /// Account the token ledger credits with deposits
    pub custody: Address,
    pub treasury: Address,
    pub burn_sink: Address,
    pub paused: bool,
    pub rate_limit_interval_secs: u64,
    pub roles: AccessControl,
    pub registry: GameRegistry,
    pub sessions: BTreeMap<SessionId, SessionRecord>,
    pub deposits: BTreeMap<(SessionId, Address), DepositRecord>,
    pub pending: BTreeMap<Address, Amount>,
    pub total_pending: Amount,
    pub player_stats: BTreeMap<Address, PlayerStats>,
    pub global_stats: GlobalStats,
    /// Active sessions per owning game, for cascading cancellation. Derived
    /// from session states on load.
    pub active_sessions: BTreeMap<Address, BTreeSet<SessionId>>,
}

impl LedgerState {
    pub fn new(custody: Address, treasury: Address, burn_sink: Address, admin: Address) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            custody,
            treasury,
            burn_sink,
            paused: false,
            rate_limit_interval_secs: 0,
            roles: AccessControl::with_admin(admin),
            registry: GameRegistry::default(),
            sessions: BTreeMap::new(),
            deposits: BTreeMap::new(),
            pending: BTreeMap::new(),
            total_pending: 0,
            player_stats: BTreeMap::new(),
            global_stats: GlobalStats::default(),
            active_sessions: BTreeMap::new(),
        }
    }

    pub fn pending_of(&self, player: &Address) -> Amount {
        self.pending.get(player).copied().unwrap_or(0)
    }

    /// Funds sessions still hold in custody
    pub fn total_held(&self) -> Amount {
        self.sessions.values().map(SessionRecord::remaining).sum()
    }

    /// Every broken invariant, described. Empty means healthy.
    pub fn invariant_violations(&self, custody_balance: Amount) -> Vec<String> {
        let mut violations = Vec::new();

        let pending_sum: Amount = self.pending.values().sum();
        if pending_sum != self.total_pending {
            violations.push(format!(
                "aggregate pending {} != sum of balances {}",
                self.total_pending, pending_sum
            ));
        }

        if custody_balance < self.total_pending {
            violations.push(format!(
                "custody {} cannot cover pending payouts {}",
                custody_balance, self.total_pending
            ));
        }

        let held = self.total_held();
        if custody_balance < self.total_pending.saturating_add(held) {
            violations.push(format!(
                "custody {} cannot cover pending {} plus session funds {}",
                custody_balance, self.total_pending, held
            ));
        }

        for (id, session) in &self.sessions {
            let spent = session
                .total_paid
                .checked_add(session.refunded_total)
                .and_then(|v| v.checked_add(session.swept));
            match spent {
                Some(spent) if spent <= session.prize_pool => {}
                _ => violations.push(format!(
                    "session {} paid {} refunded {} swept {} over pool {}",
                    id, session.total_paid, session.refunded_total, session.swept, session.prize_pool
                )),
            }

            let tracked = self
                .active_sessions
                .get(&session.owning_game)
                .map(|set| set.contains(id))
                .unwrap_or(false);
            if tracked != session.is_active() {
                violations.push(format!(
                    "session {} is {} but active tracking says {}",
                    id, session.state, tracked
                ));
            }

            if session.state.is_terminal() != session.settled_at.is_some() {
                violations.push(format!(
                    "session {} is {} with close time {:?}",
                    id, session.state, session.settled_at
                ));
            }
        }

        violations
    }
}
