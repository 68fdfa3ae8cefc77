//! Time source and position oracle seams

use crate::escrow::types::Address;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Seconds since the Unix epoch
pub trait Clock: Send {
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}

/// Clock whose time only moves when told to; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Liveness check consulted for games with `requires_position`
pub trait PositionOracle: Send {
    fn is_alive(&self, player: &Address) -> bool;
}

impl<F> PositionOracle for F
where
    F: Fn(&Address) -> bool + Send,
{
    fn is_alive(&self, player: &Address) -> bool {
        self(player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared() {
        let clock = ManualClock::new(100);
        let handle = clock.clone();
        handle.advance(5);
        assert_eq!(clock.now(), 105);
        clock.set(1);
        assert_eq!(handle.now(), 1);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now() > 1_577_836_800);
    }

    #[test]
    fn test_closure_oracle() {
        let alive = Address::from_label("alive");
        let oracle = move |player: &Address| *player == alive;
        assert!(oracle.is_alive(&alive));
        assert!(!oracle.is_alive(&Address::from_label("dead")));
    }
}
