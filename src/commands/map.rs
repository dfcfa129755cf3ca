use anyhow::Result;
use calmesh_core::store::{CalendarMapping, MappingStore, SyncDirection};
use owo_colors::OwoColorize;

use super::App;

pub struct MappingUpdate {
    pub display_name: String,
    pub source_id: Option<String>,
    pub target_id: Option<String>,
    pub direction: Option<SyncDirection>,
    pub enabled: bool,
}

pub async fn run(app: &App, user: &str, update: MappingUpdate) -> Result<()> {
    let existing = app.store.calendar_mappings(user).await?;
    let (mapping, created) = apply(existing, user, update);

    app.store.upsert_calendar_mapping(mapping.clone()).await?;

    let verb = if created { "Created" } else { "Updated" };
    println!("{verb} mapping {}", mapping.display_name.bold());
    println!("  Google:     {}", mapping.source_calendar_id.as_deref().unwrap_or("(resolved on next sync)"));
    println!("  CalDAV:     {}", mapping.target_calendar_id.as_deref().unwrap_or("(resolved on next sync)"));
    println!("  Direction:  {}", mapping.direction);
    if !mapping.enabled {
        println!("  {}", "disabled".yellow());
    }

    Ok(())
}

/// Merge `update` into the mapping it refers to, matched by either calendar id
/// or by display name. Returns the mapping and whether it is new.
fn apply(existing: Vec<CalendarMapping>, user: &str, update: MappingUpdate) -> (CalendarMapping, bool) {
    let same_calendar = |m: &CalendarMapping| {
        let source = update.source_id.is_some() && m.source_calendar_id == update.source_id;
        let target = update.target_id.is_some() && m.target_calendar_id == update.target_id;
        source || target
    };

    let found = existing
        .iter()
        .find(|m| same_calendar(m))
        .or_else(|| existing.iter().find(|m| m.display_name == update.display_name))
        .cloned();
    let created = found.is_none();
    let mut mapping = found.unwrap_or_else(|| CalendarMapping::new(user, update.display_name.clone()));

    mapping.display_name = update.display_name;
    if update.source_id.is_some() {
        mapping.source_calendar_id = update.source_id;
    }
    if update.target_id.is_some() {
        mapping.target_calendar_id = update.target_id;
    }
    if let Some(direction) = update.direction {
        mapping.direction = direction;
    }
    mapping.enabled = update.enabled;

    (mapping, created)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(name: &str) -> MappingUpdate {
        MappingUpdate {
            display_name: name.into(),
            source_id: None,
            target_id: None,
            direction: None,
            enabled: true,
        }
    }

    #[test]
    fn new_mapping_when_nothing_matches() {
        let (mapping, created) = apply(Vec::new(), "alice", update("Work"));

        assert!(created);
        assert_eq!(mapping.user_id, "alice");
        assert_eq!(mapping.direction, SyncDirection::Bidirectional);
        assert!(mapping.source_calendar_id.is_none());
    }

    #[test]
    fn updates_by_name_and_keeps_resolved_ids() {
        let mut work = CalendarMapping::new("alice", "Work");
        work.source_calendar_id = Some("work@google".into());
        work.target_calendar_id = Some("https://dav/work/".into());

        let (mapping, created) = apply(
            vec![work.clone()],
            "alice",
            MappingUpdate {
                direction: Some(SyncDirection::SourceToTarget),
                enabled: false,
                ..update("Work")
            },
        );

        assert!(!created);
        assert_eq!(mapping.id, work.id);
        assert_eq!(mapping.source_calendar_id, work.source_calendar_id);
        assert_eq!(mapping.direction, SyncDirection::SourceToTarget);
        assert!(!mapping.enabled);
    }

    #[test]
    fn calendar_id_match_allows_rename() {
        let mut work = CalendarMapping::new("alice", "Work");
        work.source_calendar_id = Some("work@google".into());

        let (mapping, created) = apply(
            vec![work.clone()],
            "alice",
            MappingUpdate {
                source_id: Some("work@google".into()),
                ..update("Office")
            },
        );

        assert!(!created);
        assert_eq!(mapping.id, work.id);
        assert_eq!(mapping.display_name, "Office");
    }
}
