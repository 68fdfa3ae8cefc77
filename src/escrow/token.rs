//! Fungible-token ledger collaborator
//!
//! The engine never mutates balances directly. Each operation hands the
//! ledger one batch of transfers which must apply completely or not at all.

use crate::escrow::types::{Address, Amount};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
}

impl Transfer {
    pub fn new(from: Address, to: Address, amount: Amount) -> Self {
        Self { from, to, amount }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("Insufficient balance in {account}: has {available}, needs {required}")]
    InsufficientBalance {
        account: Address,
        available: Amount,
        required: Amount,
    },

    #[error("Account frozen: {0}")]
    AccountFrozen(Address),

    #[error("Ledger rejected transfer: {0}")]
    Rejected(String),
}

pub trait TokenLedger: Send {
    /// Apply every transfer or none of them
    fn execute(&mut self, transfers: &[Transfer]) -> Result<(), TransferError>;

    fn balance_of(&self, account: &Address) -> Amount;
}

/// Balance table used by tests, the simulator and embedding hosts without a
/// real token backend
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    balances: HashMap<Address, Amount>,
    frozen: HashSet<Address>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&mut self, account: Address, amount: Amount) {
        let balance = self.balances.entry(account).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Frozen accounts can neither send nor receive
    pub fn freeze(&mut self, account: Address) {
        self.frozen.insert(account);
    }

    pub fn unfreeze(&mut self, account: &Address) {
        self.frozen.remove(account);
    }

    pub fn total_supply(&self) -> Amount {
        self.balances.values().copied().sum()
    }
}

impl TokenLedger for InMemoryLedger {
    fn execute(&mut self, transfers: &[Transfer]) -> Result<(), TransferError> {
        // Dry run against a scratch copy of only the touched balances
        let mut scratch: HashMap<Address, Amount> = HashMap::new();
        for transfer in transfers {
            for account in [&transfer.from, &transfer.to] {
                if self.frozen.contains(account) {
                    return Err(TransferError::AccountFrozen(*account));
                }
            }

            let from_balance = *scratch
                .entry(transfer.from)
                .or_insert_with(|| self.balances.get(&transfer.from).copied().unwrap_or(0));
            if from_balance < transfer.amount {
                return Err(TransferError::InsufficientBalance {
                    account: transfer.from,
                    available: from_balance,
                    required: transfer.amount,
                });
            }
            scratch.insert(transfer.from, from_balance - transfer.amount);

            let to_balance = scratch
                .entry(transfer.to)
                .or_insert_with(|| self.balances.get(&transfer.to).copied().unwrap_or(0));
            *to_balance = to_balance
                .checked_add(transfer.amount)
                .ok_or_else(|| TransferError::Rejected("balance overflow".to_string()))?;
        }

        self.balances.extend(scratch);
        Ok(())
    }

    fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_applies_in_order() {
        let (a, b, c) = (Address::from_label("a"), Address::from_label("b"), Address::from_label("c"));
        let mut ledger = InMemoryLedger::new();
        ledger.mint(a, 100);

        // b can forward funds it only receives earlier in the same batch
        ledger
            .execute(&[Transfer::new(a, b, 60), Transfer::new(b, c, 50)])
            .unwrap();
        assert_eq!(ledger.balance_of(&a), 40);
        assert_eq!(ledger.balance_of(&b), 10);
        assert_eq!(ledger.balance_of(&c), 50);
        assert_eq!(ledger.total_supply(), 100);
    }

    #[test]
    fn test_failed_batch_changes_nothing() {
        let (a, b) = (Address::from_label("a"), Address::from_label("b"));
        let mut ledger = InMemoryLedger::new();
        ledger.mint(a, 100);

        let err = ledger
            .execute(&[Transfer::new(a, b, 60), Transfer::new(a, b, 60)])
            .unwrap_err();
        assert!(matches!(err, TransferError::InsufficientBalance { available: 40, .. }));
        assert_eq!(ledger.balance_of(&a), 100);
        assert_eq!(ledger.balance_of(&b), 0);
    }

    #[test]
    fn test_frozen_account_blocks_batch() {
        let (a, b) = (Address::from_label("a"), Address::from_label("b"));
        let mut ledger = InMemoryLedger::new();
        ledger.mint(a, 10);
        ledger.freeze(b);

        assert_eq!(
            ledger.execute(&[Transfer::new(a, b, 1)]),
            Err(TransferError::AccountFrozen(b))
        );
        ledger.unfreeze(&b);
        assert!(ledger.execute(&[Transfer::new(a, b, 1)]).is_ok());
    }
}
