//! Two-phase commit-reveal used by games that need player-supplied randomness
//!
//! Phase one stores `sha256(round || committer || choice || secret)` and locks
//! a stake. Phase two checks the revealed `(choice, secret)` and releases the
//! stake. A committer who misses the reveal window can be forfeited by anyone.
//! This book only tracks stakes; moving tokens is up to the caller.

use crate::escrow::types::{Address, Amount, SessionId};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitRevealError {
    #[error("Stake must be greater than zero")]
    ZeroStake,

    #[error("Commitment already exists for {committer} in round {round}")]
    AlreadyCommitted { round: SessionId, committer: Address },

    #[error("No commitment for {committer} in round {round}")]
    NotCommitted { round: SessionId, committer: Address },

    #[error("Commitment already resolved")]
    AlreadyResolved,

    #[error("Reveal window closed at {deadline}")]
    RevealWindowClosed { deadline: u64 },

    #[error("Reveal window still open until {deadline}")]
    RevealWindowOpen { deadline: u64 },

    #[error("Revealed values do not match commitment")]
    CommitmentMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentStatus {
    Committed,
    Revealed { choice: u8 },
    Forfeited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub hash: [u8; 32],
    pub stake: Amount,
    pub reveal_deadline: u64,
    pub status: CommitmentStatus,
}

/// Outcome of a successful reveal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revealed {
    pub choice: u8,
    pub released_stake: Amount,
}

pub fn compute_commitment(round: &SessionId, committer: &Address, choice: u8, secret: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(round.as_bytes());
    hasher.update(committer.as_bytes());
    hasher.update([choice]);
    hasher.update(secret);
    hasher.finalize().into()
}

pub fn generate_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

#[derive(Debug, Clone, Default)]
pub struct CommitRevealBook {
    commitments: BTreeMap<(SessionId, Address), Commitment>,
}

impl CommitRevealBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(
        &mut self,
        round: SessionId,
        committer: Address,
        hash: [u8; 32],
        stake: Amount,
        now: u64,
        reveal_window: u64,
    ) -> Result<u64, CommitRevealError> {
        if stake == 0 {
            return Err(CommitRevealError::ZeroStake);
        }
        let key = (round, committer);
        if self.commitments.contains_key(&key) {
            return Err(CommitRevealError::AlreadyCommitted { round, committer });
        }

        let reveal_deadline = now.saturating_add(reveal_window);
        self.commitments.insert(
            key,
            Commitment {
                hash,
                stake,
                reveal_deadline,
                status: CommitmentStatus::Committed,
            },
        );
        tracing::debug!(round = %round, committer = %committer, stake, reveal_deadline, "Commitment stored");
        Ok(reveal_deadline)
    }

    /// Accepted up to and including the deadline
    pub fn reveal(
        &mut self,
        round: SessionId,
        committer: Address,
        choice: u8,
        secret: &[u8; 32],
        now: u64,
    ) -> Result<Revealed, CommitRevealError> {
        let commitment = self.open_commitment(round, committer)?;
        if now > commitment.reveal_deadline {
            return Err(CommitRevealError::RevealWindowClosed {
                deadline: commitment.reveal_deadline,
            });
        }
        if compute_commitment(&round, &committer, choice, secret) != commitment.hash {
            return Err(CommitRevealError::CommitmentMismatch);
        }

        commitment.status = CommitmentStatus::Revealed { choice };
        Ok(Revealed {
            choice,
            released_stake: commitment.stake,
        })
    }

    /// Only strictly after the deadline. Returns the forfeited stake.
    pub fn forfeit(&mut self, round: SessionId, committer: Address, now: u64) -> Result<Amount, CommitRevealError> {
        let commitment = self.open_commitment(round, committer)?;
        if now <= commitment.reveal_deadline {
            return Err(CommitRevealError::RevealWindowOpen {
                deadline: commitment.reveal_deadline,
            });
        }
        commitment.status = CommitmentStatus::Forfeited;
        tracing::info!(round = %round, committer = %committer, stake = commitment.stake, "Commitment forfeited");
        Ok(commitment.stake)
    }

    pub fn get(&self, round: &SessionId, committer: &Address) -> Option<&Commitment> {
        self.commitments.get(&(*round, *committer))
    }

    /// Unresolved commitments in a round
    pub fn pending_in_round(&self, round: &SessionId) -> usize {
        self.commitments
            .iter()
            .filter(|((r, _), c)| r == round && c.status == CommitmentStatus::Committed)
            .count()
    }

    fn open_commitment(&mut self, round: SessionId, committer: Address) -> Result<&mut Commitment, CommitRevealError> {
        let commitment = self
            .commitments
            .get_mut(&(round, committer))
            .ok_or(CommitRevealError::NotCommitted { round, committer })?;
        if commitment.status != CommitmentStatus::Committed {
            return Err(CommitRevealError::AlreadyResolved);
        }
        Ok(commitment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (CommitRevealBook, SessionId, Address, [u8; 32]) {
        let round = SessionId::from_label("round-1");
        let alice = Address::from_label("alice");
        let secret = generate_secret();
        let mut book = CommitRevealBook::new();
        let hash = compute_commitment(&round, &alice, 3, &secret);
        assert_eq!(book.commit(round, alice, hash, 50, 100, 10).unwrap(), 110);
        (book, round, alice, secret)
    }

    #[test]
    fn test_reveal_releases_stake() {
        let (mut book, round, alice, secret) = setup();
        assert_eq!(book.pending_in_round(&round), 1);

        let revealed = book.reveal(round, alice, 3, &secret, 110).unwrap();
        assert_eq!(revealed, Revealed { choice: 3, released_stake: 50 });
        assert_eq!(book.get(&round, &alice).unwrap().status, CommitmentStatus::Revealed { choice: 3 });
        assert_eq!(book.pending_in_round(&round), 0);
        assert_eq!(book.reveal(round, alice, 3, &secret, 110), Err(CommitRevealError::AlreadyResolved));
    }

    #[test]
    fn test_wrong_choice_or_secret_rejected() {
        let (mut book, round, alice, secret) = setup();
        assert_eq!(book.reveal(round, alice, 4, &secret, 105), Err(CommitRevealError::CommitmentMismatch));
        assert_eq!(book.reveal(round, alice, 3, &[0u8; 32], 105), Err(CommitRevealError::CommitmentMismatch));
        // Still open after failed attempts
        assert!(book.reveal(round, alice, 3, &secret, 105).is_ok());
    }

    #[test]
    fn test_commitment_is_bound_to_committer() {
        let (mut book, round, _alice, secret) = setup();
        let bob = Address::from_label("bob");
        let stolen = compute_commitment(&round, &Address::from_label("alice"), 3, &secret);
        book.commit(round, bob, stolen, 50, 100, 10).unwrap();
        assert_eq!(book.reveal(round, bob, 3, &secret, 101), Err(CommitRevealError::CommitmentMismatch));
    }

    #[test]
    fn test_forfeit_after_deadline() {
        let (mut book, round, alice, secret) = setup();
        assert_eq!(
            book.forfeit(round, alice, 110),
            Err(CommitRevealError::RevealWindowOpen { deadline: 110 })
        );
        assert_eq!(
            book.reveal(round, alice, 3, &secret, 111),
            Err(CommitRevealError::RevealWindowClosed { deadline: 110 })
        );
        assert_eq!(book.forfeit(round, alice, 111).unwrap(), 50);
        assert_eq!(book.forfeit(round, alice, 112), Err(CommitRevealError::AlreadyResolved));
    }

    #[test]
    fn test_commit_validation() {
        let (mut book, round, alice, _) = setup();
        assert_eq!(
            book.commit(round, alice, [1u8; 32], 5, 0, 10),
            Err(CommitRevealError::AlreadyCommitted { round, committer: alice })
        );
        assert_eq!(
            book.commit(round, Address::from_label("bob"), [1u8; 32], 0, 0, 10),
            Err(CommitRevealError::ZeroStake)
        );
        assert!(matches!(
            book.forfeit(SessionId::from_label("other"), alice, 500),
            Err(CommitRevealError::NotCommitted { .. })
        ));
    }
}
