//! Game registry adapter
//!
//! Holds the configuration each authorized game plays under. Game metadata
//! and staged removal live in an external registry that drives these hooks.

use crate::errors::{EscrowError, EscrowResult};
use crate::escrow::fees;
use crate::escrow::types::{Address, GameConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRegistry {
    games: BTreeMap<Address, GameConfig>,
}

impl GameRegistry {
    pub fn register(&mut self, game: Address, config: GameConfig) -> EscrowResult<()> {
        if game.is_zero() {
            return Err(EscrowError::InvalidAddress);
        }
        if self.games.contains_key(&game) {
            return Err(EscrowError::GameAlreadyRegistered(game));
        }
        fees::validate_config(&config)?;
        self.games.insert(game, config);
        Ok(())
    }

    /// Replace fee and entry settings; the pause flag is left as it was
    pub fn update(&mut self, game: &Address, config: GameConfig) -> EscrowResult<GameConfig> {
        fees::validate_config(&config)?;
        let entry = self
            .games
            .get_mut(game)
            .ok_or(EscrowError::GameNotRegistered(*game))?;
        let previous = *entry;
        *entry = GameConfig {
            paused: previous.paused,
            ..config
        };
        Ok(previous)
    }

    pub fn set_paused(&mut self, game: &Address, paused: bool) -> EscrowResult<()> {
        let entry = self
            .games
            .get_mut(game)
            .ok_or(EscrowError::GameNotRegistered(*game))?;
        entry.paused = paused;
        Ok(())
    }

    pub fn get(&self, game: &Address) -> Option<&GameConfig> {
        self.games.get(game)
    }

    /// Caller must be a known game; paused games still pass
    pub fn require_registered(&self, game: &Address) -> EscrowResult<&GameConfig> {
        self.games.get(game).ok_or(EscrowError::GameNotRegistered(*game))
    }

    /// Caller must be a known, unpaused game
    pub fn require_playable(&self, game: &Address) -> EscrowResult<&GameConfig> {
        let config = self.require_registered(game)?;
        if config.paused {
            return Err(EscrowError::GamePaused(*game));
        }
        Ok(config)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &GameConfig)> {
        self.games.iter()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}
