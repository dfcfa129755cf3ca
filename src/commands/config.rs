use anyhow::Result;
use owo_colors::OwoColorize;

use crate::config::{CLIENT_ID_ENV, Config};

pub fn run() -> Result<()> {
    let config_path = Config::config_path()?;
    if Config::write_default(&config_path)? {
        println!("Created default config at {}\n", config_path.display());
    }

    let config = Config::load()?;

    println!("{}", "Paths".bold());
    println!("  Config:  {}", config_path.display());
    println!("  Store:   {}", config.store_path()?.display());

    println!("\n{}", "Sync".bold());
    println!("  Every {} minutes, {} workers", config.sync.interval_minutes, config.sync.workers);
    println!(
        "  Window:  {} days back ({} on first sync), {} days ahead",
        config.sync.lookback_days, config.sync.initial_lookback_days, config.sync.lookahead_days
    );

    if config.google.client_id.is_empty() {
        println!(
            "\n{} Google client_id is not set. Add it to the config or set {CLIENT_ID_ENV}.",
            "!".yellow()
        );
    }

    Ok(())
}
