//! escrowctl - operator tooling for the wager escrow ledger
//!
//! Prints effective configuration, inspects and migrates persisted ledgers,
//! and runs a scripted session against an in-memory token ledger.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wager_escrow::{
    config::{ConfigLoader, EscrowConfig},
    errors::{AppResult, StorageError},
    escrow::{
        Address, Amount, EscrowEngine, GameConfig, InMemoryLedger, ManualClock, Role, SessionId,
        TokenLedger, CURRENT_SCHEMA_VERSION,
    },
    ledger_store::LedgerStore,
    storage::OptimizedStorage,
};

/// Wager Escrow CLI
#[derive(Parser)]
#[command(name = "escrowctl")]
#[command(about = "Custody and settlement ledger for session-based wagering")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Config,

    /// Summarize a persisted ledger
    Inspect {
        /// Database directory (defaults to storage.data_directory)
        #[arg(short, long)]
        db: Option<PathBuf>,
    },

    /// Upgrade a persisted ledger to the current schema
    Migrate {
        /// Database directory (defaults to storage.data_directory)
        #[arg(short, long)]
        db: Option<PathBuf>,

        /// Record an upgrade authorization from this stored global admin, then migrate
        #[arg(long, value_name = "ADMIN_HEX", conflicts_with = "force")]
        authorize: Option<Address>,

        /// Migrate even without a recorded upgrade authorization
        #[arg(long)]
        force: bool,
    },

    /// Run one session end to end against an in-memory token ledger
    Simulate {
        /// Number of players entering the session
        #[arg(short, long, default_value = "4")]
        players: u8,

        /// Gross entry per player
        #[arg(short, long, default_value = "1000")]
        entry: u128,

        /// Persist the resulting ledger to this directory
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

fn main() -> AppResult<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    let default_filter = if cli.verbose {
        "debug"
    } else {
        config.monitoring.log_level.as_filter()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Inspect { db } => inspect(&open_store(&config, db)?),
        Commands::Migrate { db, authorize, force } => {
            migrate(&open_store(&config, db)?, authorize, force)
        }
        Commands::Simulate { players, entry, db } => simulate(&config, players, entry, db),
    }
}

fn open_store(config: &EscrowConfig, db: Option<PathBuf>) -> AppResult<LedgerStore> {
    let store = match db {
        Some(path) => LedgerStore::new(OptimizedStorage::new(path)?),
        None => LedgerStore::open(&config.storage)?,
    };
    Ok(store)
}

fn inspect(store: &LedgerStore) -> AppResult<()> {
    let Some(meta) = store.load_meta()? else {
        println!("No ledger stored");
        return Ok(());
    };

    println!("Schema version:   {}", meta.schema_version);
    println!("Treasury:         {}", meta.treasury.to_hex());
    println!("Burn sink:        {}", meta.burn_sink.to_hex());
    println!("Paused:           {}", meta.paused);
    println!("Pending payouts:  {}", meta.total_pending_payouts);
    println!("Games played:     {}", meta.global_stats.total_games_played);
    println!("Volume:           {}", meta.global_stats.total_volume);
    println!("Rake collected:   {}", meta.global_stats.total_rake_collected);
    println!("Burned:           {}", meta.global_stats.total_burned);
    if let Some(target) = meta.authorized_upgrade {
        println!("Upgrade to v{} authorized", target);
    }

    match store.load() {
        Ok(state) => {
            let active: usize = state.active_sessions.values().map(|s| s.len()).sum();
            println!("Games:            {}", state.registry.len());
            println!("Sessions:         {} ({} active)", state.sessions.len(), active);
            println!("Held in sessions: {}", state.total_held());
            println!("Players:          {}", state.player_stats.len());

            // Custody balance lives in the token ledger; assume exactly what is owed
            let owed = state.total_pending.saturating_add(state.total_held());
            let violations = state.invariant_violations(owed);
            if violations.is_empty() {
                println!("Bookkeeping consistent");
            }
            for violation in &violations {
                println!("VIOLATION: {}", violation);
            }
        }
        Err(StorageError::SchemaMismatch { found, expected }) => {
            println!("Records use schema v{}; run `escrowctl migrate` to upgrade to v{}", found, expected);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn migrate(store: &LedgerStore, authorize: Option<Address>, force: bool) -> AppResult<()> {
    if let Some(admin) = authorize {
        if store.schema_version()? != Some(CURRENT_SCHEMA_VERSION) {
            store.authorize_upgrade(admin, CURRENT_SCHEMA_VERSION)?;
            println!("Upgrade to v{} authorized by {}", CURRENT_SCHEMA_VERSION, admin.to_hex());
        }
    }
    let report = store.migrate(force)?;
    if report.is_noop() {
        println!("Already at schema v{}", report.to_version);
    } else {
        println!(
            "Migrated v{} -> v{}: {} sessions upgraded, {} unchanged",
            report.from_version, report.to_version, report.sessions_upgraded, report.sessions_unchanged
        );
    }
    Ok(())
}

/// Nine tenths of the pool, rounded down
fn winner_share(pool: Amount) -> Amount {
    pool / 10 * 9 + pool % 10 * 9 / 10
}

fn simulate(config: &EscrowConfig, players: u8, entry: u128, db: Option<PathBuf>) -> AppResult<()> {
    let clock = ManualClock::new(chrono::Utc::now().timestamp().max(0) as u64);
    let mut ledger = InMemoryLedger::new();
    let roster: Vec<Address> = (0..players)
        .map(|n| Address::from_label(&format!("player-{}", n)))
        .collect();
    for player in &roster {
        ledger.mint(*player, entry);
    }

    let admin = config.engine.global_admin;
    let mut engine = EscrowEngine::new(&config.engine, ledger, Box::new(clock.clone()))?;
    engine.grant_role(admin, Role::GameAdmin, admin)?;

    let game = Address::from_label("demo-game");
    engine.register_game(admin, game, GameConfig::new(1, 0, 500, 2_000))?;

    let session = SessionId::new(wager_escrow::commit_reveal::generate_secret());
    for player in &roster {
        engine.process_entry(game, *player, entry, session)?;
    }

    let pool = engine.session(&session).map(|s| s.prize_pool).unwrap_or(0);
    let mut swept = 0;
    if let Some(winner) = roster.first() {
        engine.credit_payout(game, session, *winner, winner_share(pool), 0, true)?;
        for loser in roster.iter().skip(1) {
            engine.credit_payout(game, session, *loser, 0, 0, false)?;
        }
        swept = engine.settle_session(game, session)?;
        engine.withdraw_payout(*winner)?;
    }

    let stats = engine.global_stats();
    println!("Session {}", session.to_hex());
    println!("Players:          {}", roster.len());
    println!("Volume:           {}", stats.total_volume);
    println!("Rake collected:   {}", stats.total_rake_collected);
    println!("Burned:           {}", stats.total_burned);
    println!("Prize pool:       {}", pool);
    println!("Swept:            {}", swept);
    println!("Treasury balance: {}", engine.ledger().balance_of(&engine.treasury()));

    let violations = engine.check_invariants();
    if violations.is_empty() {
        println!("Invariants hold");
    } else {
        for violation in &violations {
            tracing::error!(violation = %violation, "Invariant violated");
        }
    }

    if let Some(path) = db {
        let store = LedgerStore::new(OptimizedStorage::new(&path)?);
        store.save(engine.state())?;
        println!("Ledger written to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_winner_share() {
        assert_eq!(winner_share(0), 0);
        assert_eq!(winner_share(3_600), 3_240);
        assert_eq!(winner_share(19), 17);
        assert_eq!(winner_share(u128::MAX), u128::MAX / 10 * 9 + 4);
    }
}
