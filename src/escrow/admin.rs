//! Admin control plane: game registry hooks, pauses, quarantine, treasury

use crate::errors::{EscrowError, EscrowResult};
use crate::escrow::access::Role;
use crate::escrow::engine::EscrowEngine;
use crate::escrow::token::TokenLedger;
use crate::escrow::types::{Address, GameConfig};

impl<L: TokenLedger> EscrowEngine<L> {
    pub fn register_game(&mut self, caller: Address, game: Address, config: GameConfig) -> EscrowResult<()> {
        self.state.roles.require(Role::GameAdmin, &caller)?;
        self.state.registry.register(game, config)?;
        tracing::info!(
            game = %game,
            min_entry = config.min_entry,
            max_entry = config.max_entry,
            rake_bps = config.rake_bps,
            burn_bps = config.burn_bps,
            "Game registered"
        );
        Ok(())
    }

    pub fn update_game_config(&mut self, caller: Address, game: Address, config: GameConfig) -> EscrowResult<()> {
        self.state.roles.require(Role::GameAdmin, &caller)?;
        let previous = self.state.registry.update(&game, config)?;
        tracing::info!(
            game = %game,
            old_rake_bps = previous.rake_bps,
            rake_bps = config.rake_bps,
            "Game config updated"
        );
        Ok(())
    }

    pub fn pause_game(&mut self, caller: Address, game: Address) -> EscrowResult<()> {
        self.state
            .roles
            .require_any(&[Role::GameAdmin, Role::Pauser], &caller)?;
        self.state.registry.set_paused(&game, true)?;
        tracing::info!(game = %game, "Game paused");
        Ok(())
    }

    pub fn unpause_game(&mut self, caller: Address, game: Address) -> EscrowResult<()> {
        self.state.roles.require(Role::GameAdmin, &caller)?;
        self.state.registry.set_paused(&game, false)?;
        tracing::info!(game = %game, "Game unpaused");
        Ok(())
    }

    /// Blocks new entries only; withdrawals, credits and refunds keep working
    pub fn pause(&mut self, caller: Address) -> EscrowResult<()> {
        self.state.roles.require(Role::Pauser, &caller)?;
        self.state.paused = true;
        tracing::warn!(caller = %caller, "Engine paused");
        Ok(())
    }

    pub fn unpause(&mut self, caller: Address) -> EscrowResult<()> {
        self.state.roles.require(Role::GlobalAdmin, &caller)?;
        self.state.paused = false;
        tracing::info!(caller = %caller, "Engine unpaused");
        Ok(())
    }

    /// Pause a misbehaving game and cancel every session it has open so
    /// players can claim refunds. Returns how many sessions were cancelled.
    pub fn emergency_quarantine_game(&mut self, caller: Address, game: Address) -> EscrowResult<usize> {
        self.state.roles.require(Role::Pauser, &caller)?;
        self.state.registry.set_paused(&game, true)?;

        let now = self.clock.now();
        let sessions = self.state.active_sessions.remove(&game).unwrap_or_default();
        for session_id in &sessions {
            self.mark_cancelled(&game, *session_id, now);
        }

        tracing::warn!(game = %game, cancelled = sessions.len(), "Game quarantined");
        Ok(sessions.len())
    }

    /// Returns the previous treasury
    pub fn set_treasury(&mut self, caller: Address, treasury: Address) -> EscrowResult<Address> {
        self.state.roles.require(Role::GlobalAdmin, &caller)?;
        if treasury.is_zero() {
            return Err(EscrowError::InvalidAddress);
        }
        let previous = std::mem::replace(&mut self.state.treasury, treasury);
        tracing::info!(old = %previous, new = %treasury, "Treasury updated");
        Ok(previous)
    }

    pub fn set_burn_sink(&mut self, caller: Address, burn_sink: Address) -> EscrowResult<Address> {
        self.state.roles.require(Role::GlobalAdmin, &caller)?;
        if burn_sink.is_zero() {
            return Err(EscrowError::InvalidAddress);
        }
        let previous = std::mem::replace(&mut self.state.burn_sink, burn_sink);
        tracing::info!(old = %previous, new = %burn_sink, "Burn sink updated");
        Ok(previous)
    }

    pub fn grant_role(&mut self, caller: Address, role: Role, account: Address) -> EscrowResult<bool> {
        let granted = self.state.roles.grant(&caller, role, account)?;
        if granted {
            tracing::info!(role = %role, account = %account, "Role granted");
        }
        Ok(granted)
    }

    pub fn revoke_role(&mut self, caller: Address, role: Role, account: Address) -> EscrowResult<bool> {
        let revoked = self.state.roles.revoke(&caller, role, &account)?;
        if revoked {
            tracing::info!(role = %role, account = %account, "Role revoked");
        }
        Ok(revoked)
    }

    pub fn has_role(&self, role: Role, account: &Address) -> bool {
        self.state.roles.has_role(role, account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::engine::tests::{fixture, player, session};
    use crate::escrow::types::SessionState;

    #[test]
    fn test_role_gates() {
        let mut f = fixture();
        let nobody = Address::from_label("nobody");
        let game = Address::from_label("new-game");

        assert_eq!(
            f.engine.register_game(nobody, game, GameConfig::new(1, 0, 0, 0)),
            Err(EscrowError::Unauthorized { caller: nobody, role: Role::GameAdmin })
        );
        assert_eq!(
            f.engine.pause(nobody),
            Err(EscrowError::Unauthorized { caller: nobody, role: Role::Pauser })
        );
        assert!(f.engine.set_treasury(nobody, nobody).is_err());
        assert!(f.engine.emergency_quarantine_game(nobody, f.game).is_err());
    }

    #[test]
    fn test_game_pause_blocks_only_that_game() {
        let mut f = fixture();
        let other = Address::from_label("other");
        f.engine.register_game(f.admin, other, GameConfig::new(1, 0, 0, 0)).unwrap();
        f.engine.pause_game(f.admin, f.game).unwrap();

        assert_eq!(
            f.engine.process_entry(f.game, player(0), 100, session(1)),
            Err(EscrowError::GamePaused(f.game))
        );
        assert!(f.engine.process_entry(other, player(0), 100, session(2)).is_ok());

        f.engine.unpause_game(f.admin, f.game).unwrap();
        assert!(f.engine.process_entry(f.game, player(1), 100, session(1)).is_ok());
    }

    #[test]
    fn test_global_pause_blocks_entries() {
        let mut f = fixture();
        f.engine.pause(f.admin).unwrap();
        assert!(f.engine.is_paused());
        assert_eq!(
            f.engine.process_entry(f.game, player(0), 100, session(1)),
            Err(EscrowError::GlobalPaused)
        );
        f.engine.unpause(f.admin).unwrap();
        assert!(f.engine.process_entry(f.game, player(0), 100, session(1)).is_ok());
    }

    #[test]
    fn test_quarantine_cancels_only_active_sessions() {
        let mut f = fixture();
        for n in 0..3 {
            f.engine.process_entry(f.game, player(n), 100, session(n)).unwrap();
        }
        f.engine.settle_session(f.game, session(0)).unwrap();

        assert_eq!(f.engine.emergency_quarantine_game(f.admin, f.game).unwrap(), 2);
        assert_eq!(f.engine.session_state(&session(0)), SessionState::Settled);
        assert_eq!(f.engine.session_state(&session(1)), SessionState::Cancelled);
        assert_eq!(f.engine.session_state(&session(2)), SessionState::Cancelled);
        assert!(f.engine.game_config(&f.game).unwrap().paused);
        assert!(f.engine.active_sessions(&f.game).is_empty());

        // Nothing left to cancel the second time
        assert_eq!(f.engine.emergency_quarantine_game(f.admin, f.game).unwrap(), 0);
        assert!(f.engine.check_invariants().is_empty());
    }

    #[test]
    fn test_set_treasury_redirects_rake() {
        let mut f = fixture();
        let new_treasury = Address::from_label("treasury-2");
        assert_eq!(
            f.engine.set_treasury(f.admin, Address::ZERO),
            Err(EscrowError::InvalidAddress)
        );
        let old = f.engine.set_treasury(f.admin, new_treasury).unwrap();

        f.engine.process_entry(f.game, player(0), 100, session(1)).unwrap();
        assert_eq!(f.engine.ledger().balance_of(&new_treasury), 4);
        assert_eq!(f.engine.ledger().balance_of(&old), 0);

        f.engine.settle_session(f.game, session(1)).unwrap();
        assert_eq!(f.engine.ledger().balance_of(&new_treasury), 99);
    }

    #[test]
    fn test_set_burn_sink_redirects_burns() {
        let mut f = fixture();
        let sink = Address::from_label("burn-2");
        assert!(f.engine.set_burn_sink(player(0), sink).is_err());
        f.engine.set_burn_sink(f.admin, sink).unwrap();

        f.engine.process_entry(f.game, player(0), 1_000, session(1)).unwrap();
        f.engine.credit_payout(f.game, session(1), player(0), 0, 30, false).unwrap();
        assert_eq!(f.engine.ledger().balance_of(&sink), 10 + 30);
        assert!(f.engine.check_invariants().is_empty());
    }

    #[test]
    fn test_update_config_applies_to_new_entries() {
        let mut f = fixture();
        f.engine
            .update_game_config(f.admin, f.game, GameConfig::new(10, 10_000, 1_000, 0))
            .unwrap();
        assert_eq!(f.engine.process_entry(f.game, player(0), 100, session(1)).unwrap(), 90);
        assert_eq!(
            f.engine.update_game_config(f.admin, f.game, GameConfig::new(1, 0, 10_001, 0)),
            Err(EscrowError::InvalidFeeBps(10_001))
        );
    }

    #[test]
    fn test_grant_and_revoke_roles() {
        let mut f = fixture();
        let ops = Address::from_label("ops");
        assert!(f.engine.grant_role(f.admin, Role::Pauser, ops).unwrap());
        f.engine.pause(ops).unwrap();
        assert!(f.engine.revoke_role(f.admin, Role::Pauser, ops).unwrap());
        assert!(!f.engine.has_role(Role::Pauser, &ops));
        assert!(f.engine.pause(ops).is_err());
    }
}
