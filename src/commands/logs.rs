use anyhow::Result;
use calmesh_core::store::{LogLevel, SyncLogEntry, SyncLogSink};
use owo_colors::OwoColorize;

use super::App;

pub async fn run(app: &App, user: &str, limit: usize) -> Result<()> {
    let mut entries = app.store.recent(user, limit).await?;

    if entries.is_empty() {
        println!("No sync log entries for {user}.");
        return Ok(());
    }

    // Oldest first, like a log file
    entries.reverse();
    for entry in &entries {
        print_entry(entry);
    }

    Ok(())
}

fn print_entry(entry: &SyncLogEntry) {
    let line = entry.to_string();
    match entry.level {
        LogLevel::Info => println!("{line}"),
        LogLevel::Warn => println!("{}", line.yellow()),
        LogLevel::Error => println!("{}", line.red()),
        LogLevel::Success => println!("{}", line.green()),
    }

    let details = entry.details.as_ref().and_then(|d| d.as_array());
    for detail in details.into_iter().flatten() {
        match detail.as_str() {
            Some(text) => println!("    {}", text.dimmed()),
            None => println!("    {}", detail.dimmed()),
        }
    }
}
