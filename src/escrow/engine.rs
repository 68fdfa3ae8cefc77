//! Session state machine and payout ledger
//!
//! Every mutating call follows the same shape: validate against current
//! state, compute the new figures with checked arithmetic, hand the token
//! ledger a single transfer batch, and only then write the new figures back.
//! A failure at any step returns before state is touched.

use crate::config::EngineConfig;
use crate::errors::{EscrowError, EscrowResult};
use crate::escrow::clock::{Clock, PositionOracle};
use crate::escrow::fees::{self, FeeSplit};
use crate::escrow::state::LedgerState;
use crate::escrow::token::{TokenLedger, Transfer};
use crate::escrow::types::{
    Address, Amount, DepositRecord, GameConfig, GlobalStats, PlayerStats, SessionId,
    SessionRecord, SessionState, MAX_BATCH_SIZE,
};
use std::collections::BTreeSet;

pub struct EscrowEngine<L: TokenLedger> {
    pub(crate) state: LedgerState,
    pub(crate) ledger: L,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) oracle: Option<Box<dyn PositionOracle>>,
}

impl<L: TokenLedger> EscrowEngine<L> {
    pub fn new(config: &EngineConfig, ledger: L, clock: Box<dyn Clock>) -> EscrowResult<Self> {
        let addresses = [config.custody, config.treasury, config.burn_sink, config.global_admin];
        if addresses.iter().any(Address::is_zero) {
            return Err(EscrowError::InvalidAddress);
        }

        let mut state = LedgerState::new(
            config.custody,
            config.treasury,
            config.burn_sink,
            config.global_admin,
        );
        state.rate_limit_interval_secs = config.rate_limit_interval_secs;

        tracing::info!(
            custody = %config.custody,
            treasury = %config.treasury,
            rate_limit_secs = config.rate_limit_interval_secs,
            "Escrow engine created"
        );
        Ok(Self::from_state(state, ledger, clock))
    }

    /// Resume from previously persisted state
    pub fn from_state(state: LedgerState, ledger: L, clock: Box<dyn Clock>) -> Self {
        Self {
            state,
            ledger,
            clock,
            oracle: None,
        }
    }

    pub fn set_oracle(&mut self, oracle: Option<Box<dyn PositionOracle>>) {
        self.oracle = oracle;
    }

    /// Pull `gross` from the player into custody, split off rake, and add the
    /// net amount to the session's prize pool. Returns the net amount.
    pub fn process_entry(
        &mut self,
        game: Address,
        player: Address,
        gross: Amount,
        session_id: SessionId,
    ) -> EscrowResult<Amount> {
        let config = *self.state.registry.require_playable(&game)?;
        if self.state.paused {
            return Err(EscrowError::GlobalPaused);
        }
        fees::validate_entry_amount(&config, gross)?;
        self.check_position(&config, &player)?;

        let now = self.clock.now();
        self.check_rate_limit(&player, now)?;

        let mut session = match self.state.sessions.get(&session_id) {
            Some(existing) => {
                ensure_owner(session_id, existing, &game)?;
                if !existing.is_active() {
                    return Err(EscrowError::SessionNotActive(session_id));
                }
                existing.clone()
            }
            None => SessionRecord::new(game, now),
        };

        let split = fees::split_entry(gross, config.rake_bps, config.burn_bps)?;
        session.prize_pool = checked_add(session.prize_pool, split.net)?;

        let mut deposit = self.deposit(&session_id, &player);
        deposit.gross = checked_add(deposit.gross, gross)?;
        deposit.net = checked_add(deposit.net, split.net)?;

        let mut global = self.state.global_stats;
        global.total_games_played = global.total_games_played.saturating_add(1);
        global.total_volume = checked_add(global.total_volume, gross)?;
        global.total_rake_collected = checked_add(global.total_rake_collected, split.rake)?;
        global.total_burned = checked_add(global.total_burned, split.burn)?;

        self.ledger.execute(&self.entry_transfers(&player, &split))?;

        self.state.sessions.insert(session_id, session);
        self.state
            .active_sessions
            .entry(game)
            .or_default()
            .insert(session_id);
        self.state.deposits.insert((session_id, player), deposit);
        self.state
            .player_stats
            .entry(player)
            .or_default()
            .record_wager(gross, now);
        self.state.global_stats = global;

        tracing::debug!(
            game = %game,
            player = %player,
            session = %session_id,
            gross,
            net = split.net,
            rake = split.rake,
            burn = split.burn,
            "Entry processed"
        );
        Ok(split.net)
    }

    fn entry_transfers(&self, player: &Address, split: &FeeSplit) -> Vec<Transfer> {
        let custody = self.state.custody;
        let mut transfers = vec![Transfer::new(*player, custody, split.gross)];
        if split.burn > 0 {
            transfers.push(Transfer::new(custody, self.state.burn_sink, split.burn));
        }
        if split.treasury > 0 {
            transfers.push(Transfer::new(custody, self.state.treasury, split.treasury));
        }
        transfers
    }

    fn check_position(&self, config: &GameConfig, player: &Address) -> EscrowResult<()> {
        if !config.requires_position {
            return Ok(());
        }
        match self.oracle {
            Some(ref oracle) if oracle.is_alive(player) => Ok(()),
            _ => Err(EscrowError::PositionRequired(*player)),
        }
    }

    /// Entry at exactly `last_play_time + interval` is allowed
    fn check_rate_limit(&self, player: &Address, now: u64) -> EscrowResult<()> {
        let interval = self.state.rate_limit_interval_secs;
        if interval == 0 {
            return Ok(());
        }
        let Some(stats) = self.state.player_stats.get(player) else {
            return Ok(());
        };
        if stats.games_played == 0 {
            return Ok(());
        }
        let retry_at = stats.last_play_time.saturating_add(interval);
        if now < retry_at {
            return Err(EscrowError::RateLimited {
                player: *player,
                retry_at,
            });
        }
        Ok(())
    }

    /// Credit `payout` to the player's pending balance and burn `burn` out of
    /// the session pool. Zero payout with zero burn records a loss.
    pub fn credit_payout(
        &mut self,
        game: Address,
        session_id: SessionId,
        player: Address,
        payout: Amount,
        burn: Amount,
        won: bool,
    ) -> EscrowResult<()> {
        self.state.registry.require_registered(&game)?;
        let session = self.active_owned_session(&game, session_id)?;

        let requested = checked_add(payout, burn)?;
        let available = session.remaining();
        if requested > available {
            return Err(EscrowError::PayoutExceedsPrizePool { requested, available });
        }

        let total_paid = checked_add(session.total_paid, requested)?;
        let pending = checked_add(self.state.pending_of(&player), payout)?;
        let total_pending = checked_add(self.state.total_pending, payout)?;
        let total_burned = checked_add(self.state.global_stats.total_burned, burn)?;

        if burn > 0 {
            self.ledger
                .execute(&[Transfer::new(self.state.custody, self.state.burn_sink, burn)])?;
        }

        if let Some(session) = self.state.sessions.get_mut(&session_id) {
            session.total_paid = total_paid;
            session.payout_credited = true;
        }
        if payout > 0 {
            self.state.pending.insert(player, pending);
        }
        self.state.total_pending = total_pending;
        self.state.global_stats.total_burned = total_burned;
        self.state
            .player_stats
            .entry(player)
            .or_default()
            .record_result(payout, won);

        tracing::debug!(
            game = %game,
            session = %session_id,
            player = %player,
            payout,
            burn,
            won,
            "Payout credited"
        );
        Ok(())
    }

    /// Parallel-array variant of `credit_payout`. All items are checked
    /// against the pool together; duplicate players accumulate.
    pub fn batch_credit_payouts(
        &mut self,
        game: Address,
        session_id: SessionId,
        players: &[Address],
        payouts: &[Amount],
        burns: &[Amount],
        won: &[bool],
    ) -> EscrowResult<Amount> {
        let size = players.len();
        if payouts.len() != size || burns.len() != size || won.len() != size {
            return Err(EscrowError::ArrayLengthMismatch);
        }
        check_batch_size(size)?;

        self.state.registry.require_registered(&game)?;
        let session = self.active_owned_session(&game, session_id)?;

        let mut payout_total: Amount = 0;
        let mut burn_total: Amount = 0;
        for (payout, burn) in payouts.iter().zip(burns) {
            payout_total = checked_add(payout_total, *payout)?;
            burn_total = checked_add(burn_total, *burn)?;
        }
        let requested = checked_add(payout_total, burn_total)?;
        let available = session.remaining();
        if requested > available {
            return Err(EscrowError::PayoutExceedsPrizePool { requested, available });
        }

        let total_paid = checked_add(session.total_paid, requested)?;
        let total_pending = checked_add(self.state.total_pending, payout_total)?;
        let total_burned = checked_add(self.state.global_stats.total_burned, burn_total)?;
        // Individual balances are bounded by the aggregate, so they cannot overflow
        // once the aggregate has been checked.

        if burn_total > 0 {
            self.ledger.execute(&[Transfer::new(
                self.state.custody,
                self.state.burn_sink,
                burn_total,
            )])?;
        }

        for ((player, payout), won) in players.iter().zip(payouts).zip(won) {
            if *payout > 0 {
                *self.state.pending.entry(*player).or_insert(0) += *payout;
            }
            self.state
                .player_stats
                .entry(*player)
                .or_default()
                .record_result(*payout, *won);
        }
        if let Some(session) = self.state.sessions.get_mut(&session_id) {
            session.total_paid = total_paid;
            session.payout_credited = true;
        }
        self.state.total_pending = total_pending;
        self.state.global_stats.total_burned = total_burned;

        tracing::debug!(
            game = %game,
            session = %session_id,
            items = size,
            payout_total,
            burn_total,
            "Batch payouts credited"
        );
        Ok(payout_total)
    }

    /// ACTIVE -> SETTLED; the unclaimed remainder goes to treasury.
    /// Returns the swept amount.
    pub fn settle_session(&mut self, game: Address, session_id: SessionId) -> EscrowResult<Amount> {
        let session = self.active_owned_session(&game, session_id)?;
        let remainder = session.remaining();
        let swept = checked_add(session.swept, remainder)?;

        if remainder > 0 {
            self.ledger.execute(&[Transfer::new(
                self.state.custody,
                self.state.treasury,
                remainder,
            )])?;
        }

        let now = self.clock.now();
        if let Some(session) = self.state.sessions.get_mut(&session_id) {
            session.swept = swept;
            session.state = SessionState::Settled;
            session.settled_at = Some(now);
        }
        self.untrack_active(&game, &session_id);

        tracing::info!(game = %game, session = %session_id, swept = remainder, "Session settled");
        Ok(remainder)
    }

    /// ACTIVE -> CANCELLED; the remainder stays in custody for refunds
    pub fn cancel_session(&mut self, game: Address, session_id: SessionId) -> EscrowResult<()> {
        self.active_owned_session(&game, session_id)?;
        let now = self.clock.now();
        self.mark_cancelled(&game, session_id, now);

        tracing::info!(game = %game, session = %session_id, "Session cancelled");
        Ok(())
    }

    pub(crate) fn mark_cancelled(&mut self, game: &Address, session_id: SessionId, now: u64) {
        if let Some(session) = self.state.sessions.get_mut(&session_id) {
            session.state = SessionState::Cancelled;
            session.settled_at = Some(now);
        }
        self.untrack_active(game, &session_id);
    }

    fn untrack_active(&mut self, game: &Address, session_id: &SessionId) {
        if let Some(set) = self.state.active_sessions.get_mut(game) {
            set.remove(session_id);
            if set.is_empty() {
                self.state.active_sessions.remove(game);
            }
        }
    }

    /// Pay out the player's whole pending balance. Never blocked by pauses.
    pub fn withdraw_payout(&mut self, player: Address) -> EscrowResult<Amount> {
        let amount = self.state.pending_of(&player);
        if amount == 0 {
            return Err(EscrowError::NoPendingPayout(player));
        }
        let total_pending = self
            .state
            .total_pending
            .checked_sub(amount)
            .ok_or(EscrowError::ArithmeticOverflow)?;

        self.ledger
            .execute(&[Transfer::new(self.state.custody, player, amount)])?;

        self.state.pending.remove(&player);
        self.state.total_pending = total_pending;

        tracing::info!(player = %player, amount, "Payout withdrawn");
        Ok(amount)
    }

    pub(crate) fn owned_session(
        &self,
        game: &Address,
        session_id: SessionId,
    ) -> EscrowResult<&SessionRecord> {
        let session = self
            .state
            .sessions
            .get(&session_id)
            .ok_or(EscrowError::SessionNotFound(session_id))?;
        ensure_owner(session_id, session, game)?;
        Ok(session)
    }

    fn active_owned_session(
        &self,
        game: &Address,
        session_id: SessionId,
    ) -> EscrowResult<SessionRecord> {
        let session = self.owned_session(game, session_id)?;
        if !session.is_active() {
            return Err(EscrowError::SessionNotActive(session_id));
        }
        Ok(session.clone())
    }

    pub(crate) fn deposit(&self, session_id: &SessionId, player: &Address) -> DepositRecord {
        self.state
            .deposits
            .get(&(*session_id, *player))
            .copied()
            .unwrap_or_default()
    }

    pub fn game_config(&self, game: &Address) -> Option<&GameConfig> {
        self.state.registry.get(game)
    }

    pub fn session(&self, session_id: &SessionId) -> Option<&SessionRecord> {
        self.state.sessions.get(session_id)
    }

    pub fn session_state(&self, session_id: &SessionId) -> SessionState {
        self.session(session_id)
            .map(|s| s.state)
            .unwrap_or(SessionState::None)
    }

    pub fn deposit_of(&self, session_id: &SessionId, player: &Address) -> DepositRecord {
        self.deposit(session_id, player)
    }

    pub fn pending_payout(&self, player: &Address) -> Amount {
        self.state.pending_of(player)
    }

    pub fn total_pending_payouts(&self) -> Amount {
        self.state.total_pending
    }

    pub fn player_stats(&self, player: &Address) -> PlayerStats {
        self.state.player_stats.get(player).copied().unwrap_or_default()
    }

    pub fn global_stats(&self) -> GlobalStats {
        self.state.global_stats
    }

    pub fn treasury(&self) -> Address {
        self.state.treasury
    }

    pub fn custody(&self) -> Address {
        self.state.custody
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn active_sessions(&self, game: &Address) -> BTreeSet<SessionId> {
        self.state
            .active_sessions
            .get(game)
            .cloned()
            .unwrap_or_default()
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn into_state(self) -> LedgerState {
        self.state
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn custody_balance(&self) -> Amount {
        self.ledger.balance_of(&self.state.custody)
    }

    /// Solvency and bookkeeping violations against the live custody balance
    pub fn check_invariants(&self) -> Vec<String> {
        self.state.invariant_violations(self.custody_balance())
    }
}

fn ensure_owner(session_id: SessionId, session: &SessionRecord, caller: &Address) -> EscrowResult<()> {
    if session.owning_game != *caller {
        return Err(EscrowError::SessionGameMismatch {
            session: session_id,
            owner: session.owning_game,
            caller: *caller,
        });
    }
    Ok(())
}

pub(crate) fn check_batch_size(size: usize) -> EscrowResult<()> {
    if size == 0 {
        return Err(EscrowError::EmptyBatch);
    }
    if size > MAX_BATCH_SIZE {
        return Err(EscrowError::BatchTooLarge {
            size,
            max: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

pub(crate) fn checked_add(a: Amount, b: Amount) -> EscrowResult<Amount> {
    a.checked_add(b).ok_or(EscrowError::ArithmeticOverflow)
}
