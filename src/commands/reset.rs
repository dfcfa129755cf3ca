use anyhow::Result;
use calmesh_core::store::{EventMapping, MappingStore};

use super::App;

pub async fn run(app: &App, user: &str) -> Result<()> {
    let count = app.store.reset_last_synced(user).await?;
    let rows = app.store.event_mappings(user).await?;

    for line in summary(user, count, &rows) {
        println!("{line}");
    }

    Ok(())
}

/// Only rows missing a version marker are judged by timestamp, so only
/// those are affected by the reset.
fn summary(user: &str, count: usize, rows: &[EventMapping]) -> Vec<String> {
    let mut lines = vec![format!("Reset the last-synced time of {count} event mappings for {user}.")];
    if count == 0 {
        return lines;
    }

    let unmarked = rows
        .iter()
        .filter(|row| row.source_version.is_none() || row.target_version.is_none())
        .count();
    if unmarked == 0 {
        lines.push("All of them carry version markers on both sides, so the next sync detects changes as before.".into());
    } else {
        lines.push(format!(
            "{unmarked} of them lack a version marker and are compared by modification time on the next sync."
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn row(source_version: Option<&str>, target_version: Option<&str>) -> EventMapping {
        EventMapping {
            user_id: "alice".into(),
            calendar_mapping_id: "cm".into(),
            source_event_id: "g1".into(),
            target_event_id: "c1".into(),
            source_version: source_version.map(str::to_string),
            target_version: target_version.map(str::to_string),
            source_href: None,
            target_href: None,
            last_synced_at: DateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn marked_rows_are_reported_as_unaffected() {
        let lines = summary("alice", 1, &[row(Some("v1"), Some("etag-1"))]);
        assert_eq!(lines[0], "Reset the last-synced time of 1 event mappings for alice.");
        assert!(lines[1].contains("detects changes as before"));
    }

    #[test]
    fn unmarked_rows_are_counted() {
        let rows = [row(Some("v1"), None), row(Some("v2"), Some("etag-2")), row(None, None)];
        let lines = summary("alice", 3, &rows);
        assert_eq!(
            lines[1],
            "2 of them lack a version marker and are compared by modification time on the next sync."
        );
    }

    #[test]
    fn nothing_to_reset() {
        assert_eq!(summary("alice", 0, &[]).len(), 1);
    }
}
