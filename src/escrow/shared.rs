//! Thread-safe engine handle
//!
//! Calls from different threads serialize on one lock. A call made from the
//! thread that is already inside an operation (a token ledger calling back
//! into the engine mid-transfer, say) is rejected with `ReentrantCall`
//! instead of deadlocking or interleaving.

use crate::errors::{EscrowError, EscrowResult};
use crate::escrow::engine::EscrowEngine;
use crate::escrow::refunds::BatchRefundOutcome;
use crate::escrow::token::TokenLedger;
use crate::escrow::types::{Address, Amount, SessionId};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

pub struct SharedEngine<L: TokenLedger> {
    inner: Arc<Mutex<EscrowEngine<L>>>,
    owner: Arc<Mutex<Option<ThreadId>>>,
}

impl<L: TokenLedger> Clone for SharedEngine<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            owner: Arc::clone(&self.owner),
        }
    }
}

/// Clears the owner slot when the operation ends, including on panic
struct OwnerSlot<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for OwnerSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut owner) = self.0.lock() {
            *owner = None;
        }
    }
}

impl<L: TokenLedger> SharedEngine<L> {
    pub fn new(engine: EscrowEngine<L>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
            owner: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` with exclusive access to the engine
    pub fn with<T, F>(&self, op: F) -> EscrowResult<T>
    where
        F: FnOnce(&mut EscrowEngine<L>) -> EscrowResult<T>,
    {
        let me = thread::current().id();
        {
            let owner = self.owner.lock().map_err(|_| EscrowError::LockPoisoned)?;
            if *owner == Some(me) {
                tracing::warn!("Rejected reentrant engine call");
                return Err(EscrowError::ReentrantCall);
            }
        }

        let mut engine = self.inner.lock().map_err(|_| EscrowError::LockPoisoned)?;
        *self.owner.lock().map_err(|_| EscrowError::LockPoisoned)? = Some(me);
        let _slot = OwnerSlot(&self.owner);

        op(&mut engine)
    }

    pub fn process_entry(&self, game: Address, player: Address, gross: Amount, session_id: SessionId) -> EscrowResult<Amount> {
        self.with(|engine| engine.process_entry(game, player, gross, session_id))
    }

    pub fn credit_payout(
        &self,
        game: Address,
        session_id: SessionId,
        player: Address,
        payout: Amount,
        burn: Amount,
        won: bool,
    ) -> EscrowResult<()> {
        self.with(|engine| engine.credit_payout(game, session_id, player, payout, burn, won))
    }

    pub fn batch_credit_payouts(
        &self,
        game: Address,
        session_id: SessionId,
        players: &[Address],
        payouts: &[Amount],
        burns: &[Amount],
        won: &[bool],
    ) -> EscrowResult<Amount> {
        self.with(|engine| engine.batch_credit_payouts(game, session_id, players, payouts, burns, won))
    }

    pub fn settle_session(&self, game: Address, session_id: SessionId) -> EscrowResult<Amount> {
        self.with(|engine| engine.settle_session(game, session_id))
    }

    pub fn cancel_session(&self, game: Address, session_id: SessionId) -> EscrowResult<()> {
        self.with(|engine| engine.cancel_session(game, session_id))
    }

    pub fn withdraw_payout(&self, player: Address) -> EscrowResult<Amount> {
        self.with(|engine| engine.withdraw_payout(player))
    }

    pub fn emergency_refund(&self, game: Address, session_id: SessionId, player: Address, amount: Amount) -> EscrowResult<Amount> {
        self.with(|engine| engine.emergency_refund(game, session_id, player, amount))
    }

    pub fn batch_emergency_refund(&self, game: Address, session_id: SessionId, players: &[Address]) -> EscrowResult<BatchRefundOutcome> {
        self.with(|engine| engine.batch_emergency_refund(game, session_id, players))
    }

    pub fn claim_expired_refund(&self, caller: Address, session_id: SessionId, player: Address) -> EscrowResult<Amount> {
        self.with(|engine| engine.claim_expired_refund(caller, session_id, player))
    }

    pub fn pending_payout(&self, player: &Address) -> EscrowResult<Amount> {
        self.with(|engine| Ok(engine.pending_payout(player)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::engine::tests::{fixture, player, session};
    use crate::escrow::token::{InMemoryLedger, Transfer, TransferError};
    use std::sync::OnceLock;

    /// Ledger that tries to call back into the engine on every transfer
    struct ReentrantLedger {
        inner: InMemoryLedger,
        engine: Arc<OnceLock<SharedEngine<ReentrantLedger>>>,
        observed: Arc<Mutex<Vec<EscrowError>>>,
    }

    impl TokenLedger for ReentrantLedger {
        fn execute(&mut self, transfers: &[Transfer]) -> Result<(), TransferError> {
            if let Some(engine) = self.engine.get() {
                if let Err(e) = engine.withdraw_payout(player(0)) {
                    self.observed.lock().unwrap().push(e);
                }
            }
            self.inner.execute(transfers)
        }

        fn balance_of(&self, account: &Address) -> Amount {
            self.inner.balance_of(account)
        }
    }

    #[test]
    fn test_reentrant_call_is_rejected() {
        let f = fixture();
        let state = f.engine.into_state();
        let mut inner = InMemoryLedger::new();
        inner.mint(player(0), 10_000);

        let slot = Arc::new(OnceLock::new());
        let observed = Arc::new(Mutex::new(Vec::new()));
        let ledger = ReentrantLedger {
            inner,
            engine: Arc::clone(&slot),
            observed: Arc::clone(&observed),
        };
        let engine = EscrowEngine::from_state(
            state,
            ledger,
            Box::new(crate::escrow::clock::ManualClock::new(1_000)),
        );
        let shared = SharedEngine::new(engine);
        assert!(slot.set(shared.clone()).is_ok());

        let game = Address::from_label("game");
        shared.process_entry(game, player(0), 1_000, session(1)).unwrap();

        let seen = observed.lock().unwrap();
        assert_eq!(seen.as_slice(), &[EscrowError::ReentrantCall]);
        // The outer call still completed normally
        assert_eq!(shared.with(|e| Ok(e.session(&session(1)).map(|s| s.prize_pool))).unwrap(), Some(950));
    }

    #[test]
    fn test_threads_serialize() {
        let mut f = fixture();
        for n in 0..4 {
            f.engine.process_entry(f.game, player(n), 1_000, session(1)).unwrap();
        }
        let game = f.game;
        let shared = SharedEngine::new(f.engine);

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let shared = shared.clone();
                thread::spawn(move || shared.credit_payout(game, session(1), player(n), 900, 0, true))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        // 4 * 950 pooled, 4 * 900 credited
        assert_eq!(shared.with(|e| Ok(e.total_pending_payouts())).unwrap(), 3_600);
        assert!(shared.with(|e| Ok(e.check_invariants())).unwrap().is_empty());
        assert_eq!(shared.withdraw_payout(player(2)).unwrap(), 900);
    }
}
