#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use debate_engine::bans::BanService;
use debate_engine::config::Config;
use debate_engine::db::DatabaseManager;
use debate_engine::platform::LogNotifier;
use debate_engine::util::logging::init_tracing;

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = Config::load_from_file(&args.config)?;
    if let Some(level) = args.log {
        config.logging.level = level;
    }
    init_tracing(&config.logging);
    info!(config = %args.config.display(), "debate engine starting up");

    let db_manager = Arc::new(DatabaseManager::new(&config.database).await?);
    db_manager.migrate().await?;

    let bans = Arc::new(BanService::new(
        db_manager.ban_store(),
        db_manager.case_log_store(),
        Arc::new(LogNotifier),
    ));

    match args.command.unwrap_or(Command::Run) {
        Command::SetCounter { value } => {
            db_manager.thread_store().set_counter(value).await?;
            info!(value, "debate counter overwritten");
            Ok(())
        }
        Command::Sweep => {
            let lifted = bans.sweep_expired().await?;
            info!(lifted, "expired ban sweep finished");
            Ok(())
        }
        Command::Run => run(&config, bans).await,
    }
}

/// The daemon: keeps the store consistent on its own schedule. The
/// platform-backed jobs (reconciliation, gap repair, idle archival)
/// run in the embedding process that owns the chat connector; this
/// process covers everything the store alone can decide.
async fn run(config: &Config, bans: Arc<BanService>) -> Result<()> {
    let sweep_bans = bans.clone();
    let period = Duration::from_secs(config.scheduler.ban_sweep_interval_secs);
    let sweep_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep_bans.sweep_expired().await {
                Ok(lifted) if lifted > 0 => info!(lifted, "ban sweep lifted expired bans"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "ban sweep failed"),
            }
        }
    });

    tokio::select! {
        _ = sweep_handle => {},
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    info!("debate engine shutting down");
    Ok(())
}
