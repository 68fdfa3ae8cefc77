//! Refund engine
//!
//! Refunds credit the pending-payout ledger rather than pushing funds, so
//! they share the withdrawal path. Each (session, player) pair can be
//! refunded once, and a session that has had any payout credited can never
//! be refunded: payouts do not shrink the deposit figures refunds are
//! measured against.

use crate::errors::{EscrowError, EscrowResult};
use crate::escrow::engine::{check_batch_size, checked_add, EscrowEngine};
use crate::escrow::token::TokenLedger;
use crate::escrow::types::{Address, Amount, SessionId, SessionRecord, SessionState};
use std::collections::BTreeSet;

/// Result of a batch refund
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRefundOutcome {
    pub refunded: Vec<(Address, Amount)>,
    /// Players with no deposit, already refunded, or listed twice
    pub skipped: usize,
}

impl BatchRefundOutcome {
    pub fn total(&self) -> Amount {
        self.refunded.iter().map(|(_, amount)| *amount).sum()
    }
}

/// Which states a refund path accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefundPath {
    /// Owning game acting on an active or cancelled session
    Game,
    /// Anyone, on a cancelled session only
    Public,
}

fn ensure_refundable(session_id: SessionId, session: &SessionRecord, path: RefundPath) -> EscrowResult<()> {
    if session.payout_credited {
        return Err(EscrowError::RefundsBlockedAfterPayout(session_id));
    }
    match (session.state, path) {
        (SessionState::Cancelled, _) | (SessionState::Active, RefundPath::Game) => Ok(()),
        _ => Err(EscrowError::SessionNotRefundable(session_id)),
    }
}

impl<L: TokenLedger> EscrowEngine<L> {
    /// Owning game refunds up to the player's net deposit. Even a partial
    /// refund consumes the player's one refund.
    pub fn emergency_refund(
        &mut self,
        game: Address,
        session_id: SessionId,
        player: Address,
        amount: Amount,
    ) -> EscrowResult<Amount> {
        let session = self.owned_session(&game, session_id)?;
        ensure_refundable(session_id, session, RefundPath::Game)?;
        if amount == 0 {
            return Err(EscrowError::ZeroAmount);
        }

        let deposit = self.refundable_deposit(session_id, &player)?;
        if amount > deposit {
            return Err(EscrowError::RefundExceedsDeposit {
                requested: amount,
                available: deposit,
            });
        }

        self.apply_refunds(session_id, &[(player, amount)])?;
        tracing::info!(game = %game, session = %session_id, player = %player, amount, "Emergency refund credited");
        Ok(amount)
    }

    /// Permissionless refund of a player's full net deposit from a cancelled
    /// session
    pub fn claim_expired_refund(
        &mut self,
        caller: Address,
        session_id: SessionId,
        player: Address,
    ) -> EscrowResult<Amount> {
        let session = self
            .state
            .sessions
            .get(&session_id)
            .ok_or(EscrowError::SessionNotFound(session_id))?;
        ensure_refundable(session_id, session, RefundPath::Public)?;

        let amount = self.refundable_deposit(session_id, &player)?;
        self.apply_refunds(session_id, &[(player, amount)])?;

        tracing::info!(caller = %caller, session = %session_id, player = %player, amount, "Expired refund claimed");
        Ok(amount)
    }

    /// Full refunds for many players. Players with nothing to refund are
    /// skipped rather than failing the batch.
    pub fn batch_emergency_refund(
        &mut self,
        game: Address,
        session_id: SessionId,
        players: &[Address],
    ) -> EscrowResult<BatchRefundOutcome> {
        check_batch_size(players.len())?;
        let session = self.owned_session(&game, session_id)?;
        ensure_refundable(session_id, session, RefundPath::Game)?;

        let mut outcome = BatchRefundOutcome::default();
        let mut seen = BTreeSet::new();
        for player in players {
            if !seen.insert(*player) {
                outcome.skipped += 1;
                continue;
            }
            match self.refundable_deposit(session_id, player) {
                Ok(amount) => outcome.refunded.push((*player, amount)),
                Err(EscrowError::NothingToRefund { .. }) | Err(EscrowError::AlreadyRefunded { .. }) => {
                    outcome.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.apply_refunds(session_id, &outcome.refunded)?;
        tracing::info!(
            game = %game,
            session = %session_id,
            refunded = outcome.refunded.len(),
            skipped = outcome.skipped,
            total = outcome.total(),
            "Batch emergency refund credited"
        );
        Ok(outcome)
    }

    fn refundable_deposit(&self, session_id: SessionId, player: &Address) -> EscrowResult<Amount> {
        let deposit = self.deposit(&session_id, player);
        if deposit.refunded {
            return Err(EscrowError::AlreadyRefunded {
                session: session_id,
                player: *player,
            });
        }
        if deposit.net == 0 {
            return Err(EscrowError::NothingToRefund {
                session: session_id,
                player: *player,
            });
        }
        Ok(deposit.net)
    }

    /// Check every refund against the session remainder, then credit all
    fn apply_refunds(&mut self, session_id: SessionId, refunds: &[(Address, Amount)]) -> EscrowResult<()> {
        let session = self
            .state
            .sessions
            .get(&session_id)
            .ok_or(EscrowError::SessionNotFound(session_id))?;

        let mut requested: Amount = 0;
        for (_, amount) in refunds {
            requested = checked_add(requested, *amount)?;
        }
        let available = session.remaining();
        if requested > available {
            return Err(EscrowError::PayoutExceedsPrizePool { requested, available });
        }
        let refunded_total = checked_add(session.refunded_total, requested)?;
        let total_pending = checked_add(self.state.total_pending, requested)?;

        for (player, amount) in refunds {
            let key = (session_id, *player);
            self.state.deposits.entry(key).or_default().refunded = true;
            *self.state.pending.entry(*player).or_insert(0) += *amount;
        }
        if let Some(session) = self.state.sessions.get_mut(&session_id) {
            session.refunded_total = refunded_total;
        }
        self.state.total_pending = total_pending;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::engine::tests::{fixture, player, session};

    #[test]
    fn test_emergency_refund_on_active_session() {
        let mut f = fixture();
        f.engine.process_entry(f.game, player(0), 1_000, session(1)).unwrap();

        assert_eq!(f.engine.emergency_refund(f.game, session(1), player(0), 400).unwrap(), 400);
        assert_eq!(f.engine.pending_payout(&player(0)), 400);
        assert!(f.engine.deposit_of(&session(1), &player(0)).refunded);

        // One-shot even after a partial refund
        assert_eq!(
            f.engine.emergency_refund(f.game, session(1), player(0), 100),
            Err(EscrowError::AlreadyRefunded { session: session(1), player: player(0) })
        );
        assert!(f.engine.check_invariants().is_empty());
    }

    #[test]
    fn test_emergency_refund_bounds() {
        let mut f = fixture();
        f.engine.process_entry(f.game, player(0), 1_000, session(1)).unwrap();

        assert_eq!(
            f.engine.emergency_refund(f.game, session(1), player(0), 0),
            Err(EscrowError::ZeroAmount)
        );
        assert_eq!(
            f.engine.emergency_refund(f.game, session(1), player(0), 951),
            Err(EscrowError::RefundExceedsDeposit { requested: 951, available: 950 })
        );
        assert_eq!(
            f.engine.emergency_refund(f.game, session(1), player(3), 1),
            Err(EscrowError::NothingToRefund { session: session(1), player: player(3) })
        );
        let stranger = Address::from_label("other");
        assert!(matches!(
            f.engine.emergency_refund(stranger, session(1), player(0), 1),
            Err(EscrowError::SessionGameMismatch { .. })
        ));
    }

    #[test]
    fn test_payout_blocks_refunds_even_after_cancel() {
        let mut f = fixture();
        f.engine.process_entry(f.game, player(0), 1_000, session(1)).unwrap();
        f.engine.process_entry(f.game, player(1), 1_000, session(1)).unwrap();
        f.engine
            .credit_payout(f.game, session(1), player(0), 0, 0, false)
            .unwrap();
        f.engine.cancel_session(f.game, session(1)).unwrap();

        let blocked = EscrowError::RefundsBlockedAfterPayout(session(1));
        assert_eq!(f.engine.emergency_refund(f.game, session(1), player(1), 10), Err(blocked.clone()));
        assert_eq!(
            f.engine.claim_expired_refund(player(5), session(1), player(1)),
            Err(blocked.clone())
        );
        assert_eq!(
            f.engine.batch_emergency_refund(f.game, session(1), &[player(1)]),
            Err(blocked)
        );
    }

    #[test]
    fn test_claim_requires_cancelled_session() {
        let mut f = fixture();
        f.engine.process_entry(f.game, player(0), 1_000, session(1)).unwrap();
        assert_eq!(
            f.engine.claim_expired_refund(player(0), session(1), player(0)),
            Err(EscrowError::SessionNotRefundable(session(1)))
        );

        f.engine.cancel_session(f.game, session(1)).unwrap();
        // Anyone may trigger the claim on the player's behalf
        assert_eq!(f.engine.claim_expired_refund(player(7), session(1), player(0)).unwrap(), 950);
        assert_eq!(f.engine.pending_payout(&player(0)), 950);
        assert_eq!(f.engine.pending_payout(&player(7)), 0);
        assert_eq!(
            f.engine.claim_expired_refund(player(0), session(1), player(0)),
            Err(EscrowError::AlreadyRefunded { session: session(1), player: player(0) })
        );
        assert_eq!(
            f.engine.claim_expired_refund(player(0), session(2), player(0)),
            Err(EscrowError::SessionNotFound(session(2)))
        );
    }

    #[test]
    fn test_settled_session_not_refundable() {
        let mut f = fixture();
        f.engine.process_entry(f.game, player(0), 1_000, session(1)).unwrap();
        f.engine.settle_session(f.game, session(1)).unwrap();
        assert_eq!(
            f.engine.emergency_refund(f.game, session(1), player(0), 1),
            Err(EscrowError::SessionNotRefundable(session(1)))
        );
    }

    #[test]
    fn test_refund_paths_share_one_shot() {
        let mut f = fixture();
        f.engine.process_entry(f.game, player(0), 1_000, session(1)).unwrap();
        f.engine.cancel_session(f.game, session(1)).unwrap();
        f.engine.emergency_refund(f.game, session(1), player(0), 1).unwrap();

        assert!(f.engine.claim_expired_refund(player(0), session(1), player(0)).is_err());
        let outcome = f.engine.batch_emergency_refund(f.game, session(1), &[player(0)]).unwrap();
        assert!(outcome.refunded.is_empty());
        assert_eq!(outcome.skipped, 1);
        assert_eq!(f.engine.pending_payout(&player(0)), 1);
    }

    #[test]
    fn test_batch_refund_skips_and_dedupes() {
        let mut f = fixture();
        for n in 0..3 {
            f.engine.process_entry(f.game, player(n), 1_000, session(1)).unwrap();
        }
        f.engine.cancel_session(f.game, session(1)).unwrap();
        f.engine.claim_expired_refund(player(2), session(1), player(2)).unwrap();

        let players = [player(0), player(1), player(1), player(2), player(6)];
        let outcome = f.engine.batch_emergency_refund(f.game, session(1), &players).unwrap();
        assert_eq!(outcome.refunded, vec![(player(0), 950), (player(1), 950)]);
        assert_eq!(outcome.skipped, 3);
        assert_eq!(outcome.total(), 1_900);
        assert_eq!(f.engine.session(&session(1)).unwrap().remaining(), 0);
        assert!(f.engine.check_invariants().is_empty());
    }

    #[test]
    fn test_batch_refund_size_limits() {
        let mut f = fixture();
        f.engine.process_entry(f.game, player(0), 1_000, session(1)).unwrap();

        assert_eq!(
            f.engine.batch_emergency_refund(f.game, session(1), &[]),
            Err(EscrowError::EmptyBatch)
        );
        let many: Vec<Address> = (0..101).map(player).collect();
        assert_eq!(
            f.engine.batch_emergency_refund(f.game, session(1), &many),
            Err(EscrowError::BatchTooLarge { size: 101, max: 100 })
        );
    }
}
