//! Fee splitting and entry validation
//!
//! `rake = floor(gross * rake_bps / 10000)`, `net = gross - rake`,
//! `burn = floor(rake * burn_bps / 10000)`, treasury takes the rest of the rake.

use crate::errors::{EscrowError, EscrowResult};
use crate::escrow::types::{Amount, GameConfig, BPS_DENOMINATOR};

/// How one gross entry is divided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub gross: Amount,
    pub rake: Amount,
    pub net: Amount,
    pub burn: Amount,
    pub treasury: Amount,
}

/// Split a gross entry according to the game's rake and burn rates
pub fn split_entry(gross: Amount, rake_bps: u16, burn_bps: u16) -> EscrowResult<FeeSplit> {
    validate_bps(rake_bps)?;
    validate_bps(burn_bps)?;

    let rake = apply_bps(gross, rake_bps)?;
    let burn = apply_bps(rake, burn_bps)?;

    Ok(FeeSplit {
        gross,
        rake,
        net: gross - rake,
        burn,
        treasury: rake - burn,
    })
}

fn apply_bps(amount: Amount, bps: u16) -> EscrowResult<Amount> {
    amount
        .checked_mul(Amount::from(bps))
        .map(|scaled| scaled / BPS_DENOMINATOR)
        .ok_or(EscrowError::ArithmeticOverflow)
}

pub fn validate_bps(bps: u16) -> EscrowResult<()> {
    if u128::from(bps) > BPS_DENOMINATOR {
        return Err(EscrowError::InvalidFeeBps(bps));
    }
    Ok(())
}

/// Check a config before it is stored
pub fn validate_config(config: &GameConfig) -> EscrowResult<()> {
    validate_bps(config.rake_bps)?;
    validate_bps(config.burn_bps)?;
    if config.max_entry != 0 && config.min_entry > config.max_entry {
        return Err(EscrowError::InvalidEntryBounds {
            min: config.min_entry,
            max: config.max_entry,
        });
    }
    Ok(())
}

/// `gross` must lie in `[min_entry, max_entry]`; a zero max is unbounded.
/// Zero entries are always rejected.
pub fn validate_entry_amount(config: &GameConfig, gross: Amount) -> EscrowResult<()> {
    let above_max = config.max_entry != 0 && gross > config.max_entry;
    if gross == 0 || gross < config.min_entry || above_max {
        return Err(EscrowError::InvalidEntryAmount {
            amount: gross,
            min: config.min_entry,
            max: config.max_entry,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_split() {
        let split = split_entry(100, 500, 2000).unwrap();
        assert_eq!(split.rake, 5);
        assert_eq!(split.burn, 1);
        assert_eq!(split.treasury, 4);
        assert_eq!(split.net, 95);
    }

    #[test]
    fn test_split_rounds_down() {
        // 99 * 250 / 10000 = 2.475
        let split = split_entry(99, 250, 5000).unwrap();
        assert_eq!(split.rake, 2);
        assert_eq!(split.burn, 1);
        assert_eq!(split.net, 97);
        assert_eq!(split.treasury, 1);
    }

    #[test]
    fn test_zero_and_full_rates() {
        let none = split_entry(1_000, 0, 10_000).unwrap();
        assert_eq!((none.rake, none.burn, none.net), (0, 0, 1_000));

        let all = split_entry(1_000, 10_000, 10_000).unwrap();
        assert_eq!((all.rake, all.burn, all.treasury, all.net), (1_000, 1_000, 0, 0));
    }

    #[test]
    fn test_bps_bounds() {
        assert_eq!(split_entry(1, 10_001, 0), Err(EscrowError::InvalidFeeBps(10_001)));
        assert_eq!(split_entry(1, 0, 10_001), Err(EscrowError::InvalidFeeBps(10_001)));
    }

    #[test]
    fn test_overflow_is_reported() {
        assert_eq!(split_entry(u128::MAX, 500, 0), Err(EscrowError::ArithmeticOverflow));
    }

    #[test]
    fn test_entry_bounds() {
        let config = GameConfig::new(10, 100, 0, 0);
        assert!(validate_entry_amount(&config, 10).is_ok());
        assert!(validate_entry_amount(&config, 100).is_ok());
        assert!(validate_entry_amount(&config, 9).is_err());
        assert!(validate_entry_amount(&config, 101).is_err());

        let unbounded = GameConfig::new(10, 0, 0, 0);
        assert!(validate_entry_amount(&unbounded, u128::MAX).is_ok());
        assert!(validate_entry_amount(&GameConfig::new(0, 0, 0, 0), 0).is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(validate_config(&GameConfig::new(1, 0, 500, 2000)).is_ok());
        assert_eq!(
            validate_config(&GameConfig::new(50, 10, 0, 0)),
            Err(EscrowError::InvalidEntryBounds { min: 50, max: 10 })
        );
    }
}
