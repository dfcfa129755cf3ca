use std::sync::Arc;

use anyhow::Result;
use calmesh_core::CalendarInfo;
use calmesh_core::store::{CalendarMapping, MappingStore, Provider};
use owo_colors::OwoColorize;

use super::App;
use crate::sync::{RemoteFactory, StoreRefreshHook};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Source,
    Target,
}

pub async fn run(app: &App, user: &str) -> Result<()> {
    let google = app.account(user, Provider::Google).await?;
    let caldav = app.account(user, Provider::CalDav).await?;

    let factory = app.factory();
    let hook = Arc::new(StoreRefreshHook::new(user, app.store.clone()));
    let source = factory.source(&google, hook)?;
    let target = factory.target(&caldav)?;

    let mappings = app.store.calendar_mappings(user).await?;

    println!("{}", "Google".bold());
    match source.list_calendars().await {
        Ok(calendars) => print_calendars(&calendars, &mappings, Side::Source),
        Err(e) => println!("   {}", e.to_string().red()),
    }

    println!("\n{}", "CalDAV".bold());
    match target.list_calendars().await {
        Ok(calendars) => print_calendars(&calendars, &mappings, Side::Target),
        Err(e) => println!("   {}", e.to_string().red()),
    }

    let pending: Vec<_> = mappings
        .iter()
        .filter(|m| m.source_calendar_id.is_none() || m.target_calendar_id.is_none())
        .collect();
    if !pending.is_empty() {
        println!("\n{}", "Resolved on next sync".bold());
        for mapping in pending {
            println!("   {} {}", "○".dimmed(), mapping.display_name);
        }
    }

    Ok(())
}

fn print_calendars(calendars: &[CalendarInfo], mappings: &[CalendarMapping], side: Side) {
    if calendars.is_empty() {
        println!("   {}", "(no calendars)".dimmed());
        return;
    }

    for calendar in calendars {
        let flag = match mapping_for(mappings, side, &calendar.id) {
            Some(m) if m.enabled => format!("synced, {}", m.direction).green().to_string(),
            Some(_) => "disabled".yellow().to_string(),
            None => "not synced".dimmed().to_string(),
        };
        println!("   {}  {}  {}", calendar.display_name, calendar.id.dimmed(), flag);
    }
}

fn mapping_for<'a>(mappings: &'a [CalendarMapping], side: Side, calendar_id: &str) -> Option<&'a CalendarMapping> {
    mappings.iter().find(|m| {
        let id = match side {
            Side::Source => m.source_calendar_id.as_deref(),
            Side::Target => m.target_calendar_id.as_deref(),
        };
        id == Some(calendar_id)
    })
}
