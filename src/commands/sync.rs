use anyhow::Result;
use calmesh_core::CalMeshError;
use calmesh_core::store::SyncTrigger;
use calmesh_core::sync::{ActionKind, SyncAction};
use owo_colors::OwoColorize;

use super::App;

pub async fn run(app: &App, user: &str) -> Result<()> {
    println!("Syncing {}...\n", user.bold());

    let report = match app.sync_service()?.sync_user(user, SyncTrigger::Manual).await {
        Ok(report) => report,
        Err(CalMeshError::SyncInProgress(_)) => anyhow::bail!(
            "A sync for '{user}' is already running, probably in `calmesh worker`.\n\
            Try again once it finishes."
        ),
        Err(e) => return Err(e.into()),
    };

    if report.is_empty() {
        println!("Everything up to date.");
        return Ok(());
    }

    for action in &report.actions {
        println!("  {}", render(action));
    }

    println!("\n{}", report.totals());
    Ok(())
}

fn render(action: &SyncAction) -> String {
    let line = action.to_string();
    if action.is_failure() {
        return line.red().to_string();
    }
    match action.kind {
        ActionKind::Create => line.green().to_string(),
        ActionKind::Update => line.yellow().to_string(),
        ActionKind::Delete => line.red().to_string(),
        ActionKind::Link => line.dimmed().to_string(),
        ActionKind::Conflict => line.magenta().to_string(),
    }
}
