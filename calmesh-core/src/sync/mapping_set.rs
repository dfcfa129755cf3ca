//! In-memory index over a user's event mappings.

use std::collections::HashMap;

use crate::error::{CalMeshError, CalMeshResult};
use crate::store::{EventMapping, MappingStore};

/// One end of an event mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Source,
    Target,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Source => Side::Target,
            Side::Target => Side::Source,
        }
    }

    pub fn event_id(self, mapping: &EventMapping) -> &str {
        match self {
            Side::Source => &mapping.source_event_id,
            Side::Target => &mapping.target_event_id,
        }
    }

    pub fn version(self, mapping: &EventMapping) -> Option<&str> {
        match self {
            Side::Source => mapping.source_version.as_deref(),
            Side::Target => mapping.target_version.as_deref(),
        }
    }

    pub fn href(self, mapping: &EventMapping) -> Option<&str> {
        match self {
            Side::Source => mapping.source_href.as_deref(),
            Side::Target => mapping.target_href.as_deref(),
        }
    }

    pub fn version_mut(self, mapping: &mut EventMapping) -> &mut Option<String> {
        match self {
            Side::Source => &mut mapping.source_version,
            Side::Target => &mut mapping.target_version,
        }
    }

    pub fn href_mut(self, mapping: &mut EventMapping) -> &mut Option<String> {
        match self {
            Side::Source => &mut mapping.source_href,
            Side::Target => &mut mapping.target_href,
        }
    }
}

/// The event mappings of one user, indexed by both event ids.
///
/// Both indexes are unique. Mutations are written through to the store first
/// and only then applied here, so the index never holds rows the store
/// rejected.
#[derive(Debug, Default)]
pub struct MappingSet {
    user_id: String,
    by_source: HashMap<String, EventMapping>,
    /// target event id → source event id
    by_target: HashMap<String, String>,
}

impl MappingSet {
    pub fn new(user_id: &str, rows: Vec<EventMapping>) -> Self {
        let mut set = MappingSet {
            user_id: user_id.to_string(),
            ..MappingSet::default()
        };
        for row in rows.into_iter().filter(|r| r.user_id == user_id) {
            set.insert(row);
        }
        set
    }

    pub async fn load(user_id: &str, store: &dyn MappingStore) -> CalMeshResult<Self> {
        Ok(MappingSet::new(user_id, store.event_mappings(user_id).await?))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    pub fn by_source(&self, source_event_id: &str) -> Option<&EventMapping> {
        self.by_source.get(source_event_id)
    }

    pub fn by_target(&self, target_event_id: &str) -> Option<&EventMapping> {
        self.by_target
            .get(target_event_id)
            .and_then(|source| self.by_source.get(source))
    }

    pub fn find(&self, side: Side, event_id: &str) -> Option<&EventMapping> {
        match side {
            Side::Source => self.by_source(event_id),
            Side::Target => self.by_target(event_id),
        }
    }

    /// Rows belonging to one calendar mapping.
    pub fn for_calendar(&self, calendar_mapping_id: &str) -> Vec<EventMapping> {
        let mut rows: Vec<_> = self
            .by_source
            .values()
            .filter(|m| m.calendar_mapping_id == calendar_mapping_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.source_event_id.cmp(&b.source_event_id));
        rows
    }

    /// Insert or update the row keyed by its source event id.
    pub async fn upsert(&mut self, mapping: EventMapping, store: &dyn MappingStore) -> CalMeshResult<()> {
        let owner = self.by_target.get(&mapping.target_event_id);
        if owner.is_some_and(|owner| *owner != mapping.source_event_id) {
            return Err(CalMeshError::MappingConflict {
                event_id: mapping.target_event_id,
            });
        }

        store.upsert_event_mapping(mapping.clone()).await?;
        self.insert(mapping);
        Ok(())
    }

    pub async fn remove(&mut self, source_event_id: &str, store: &dyn MappingStore) -> CalMeshResult<()> {
        store.delete_event_mapping(&self.user_id, source_event_id).await?;
        if let Some(row) = self.by_source.remove(source_event_id) {
            self.by_target.remove(&row.target_event_id);
        }
        Ok(())
    }

    fn insert(&mut self, mut mapping: EventMapping) {
        if let Some(previous) = self.by_source.get(&mapping.source_event_id) {
            mapping.last_synced_at = mapping.last_synced_at.max(previous.last_synced_at);
            if previous.target_event_id != mapping.target_event_id {
                self.by_target.remove(&previous.target_event_id);
            }
        }
        self.by_target
            .insert(mapping.target_event_id.clone(), mapping.source_event_id.clone());
        self.by_source.insert(mapping.source_event_id.clone(), mapping);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn row(source: &str, target: &str) -> EventMapping {
        EventMapping {
            user_id: "u1".into(),
            calendar_mapping_id: "cm".into(),
            source_event_id: source.into(),
            target_event_id: target.into(),
            source_version: Some("s1".into()),
            target_version: None,
            source_href: None,
            target_href: Some("https://dav/cal/t.ics".into()),
            last_synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn indexes_both_sides_and_writes_through() {
        let store = MemoryStore::new();
        let mut set = MappingSet::new("u1", vec![]);

        set.upsert(row("g1", "c1"), &store).await.unwrap();

        assert_eq!(set.find(Side::Target, "c1").unwrap().source_event_id, "g1");
        assert_eq!(set.find(Side::Source, "g1").unwrap().target_event_id, "c1");
        assert_eq!(store.event_mappings("u1").await.unwrap().len(), 1);

        set.remove("g1", &store).await.unwrap();
        assert!(set.is_empty());
        assert!(set.by_target("c1").is_none());
        assert!(store.event_mappings("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_second_source_for_target() {
        let store = MemoryStore::new();
        let mut set = MappingSet::new("u1", vec![row("g1", "c1")]);

        let err = set.upsert(row("g2", "c1"), &store).await.unwrap_err();
        assert!(matches!(err, CalMeshError::MappingConflict { .. }));
        assert!(set.by_source("g2").is_none());
        assert!(store.event_mappings("u1").await.unwrap().is_empty());
    }

    #[test]
    fn side_accessors() {
        let mut mapping = row("g1", "c1");
        assert_eq!(Side::Source.version(&mapping), Some("s1"));
        assert_eq!(Side::Target.version(&mapping), None);
        assert_eq!(Side::Target.href(&mapping), Some("https://dav/cal/t.ics"));

        *Side::Target.version_mut(&mut mapping) = Some("t1".into());
        assert_eq!(Side::Source.other().version(&mapping), Some("t1"));
    }
}
