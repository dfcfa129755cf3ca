use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{CalMeshError, CalMeshResult};
use crate::store::model::{
    Account, CalendarMapping, EventMapping, Provider, SyncLogEntry, User, UserId,
};
use crate::store::{CredentialStore, MappingStore, SyncLogSink, UserStore};

/// Sync log lines kept per user; older lines are dropped on append.
const MAX_LOG_ENTRIES_PER_USER: usize = 500;

/// All persisted records, with the constraint checks a database would enforce.
///
/// [`MemoryStore`] keeps this behind a lock; file-backed stores serialize it.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub calendar_mappings: Vec<CalendarMapping>,
    #[serde(default)]
    pub event_mappings: Vec<EventMapping>,
    #[serde(default)]
    pub logs: Vec<SyncLogEntry>,
}

impl StoreData {
    pub fn accounts(&self, user_id: &str) -> Vec<Account> {
        self.accounts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Connecting a first account registers the user with auto-sync on.
    pub fn save_account(&mut self, account: Account) {
        if !self.users.iter().any(|u| u.id == account.user_id) {
            self.users.push(User {
                id: account.user_id.clone(),
                auto_sync: true,
            });
        }
        match self
            .accounts
            .iter_mut()
            .find(|a| a.user_id == account.user_id && a.provider == account.provider)
        {
            Some(existing) => *existing = account,
            None => self.accounts.push(account),
        }
    }

    pub fn delete_account(&mut self, user_id: &str, provider: Provider) {
        self.accounts
            .retain(|a| !(a.user_id == user_id && a.provider == provider));
    }

    pub fn auto_sync_users(&self) -> Vec<UserId> {
        self.users
            .iter()
            .filter(|u| u.auto_sync)
            .map(|u| u.id.clone())
            .collect()
    }

    pub fn set_auto_sync(&mut self, user_id: &str, enabled: bool) {
        match self.users.iter_mut().find(|u| u.id == user_id) {
            Some(user) => user.auto_sync = enabled,
            None => self.users.push(User {
                id: user_id.to_string(),
                auto_sync: enabled,
            }),
        }
    }

    pub fn calendar_mappings(&self, user_id: &str) -> Vec<CalendarMapping> {
        self.calendar_mappings
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn upsert_calendar_mapping(&mut self, mapping: CalendarMapping) -> CalMeshResult<()> {
        let clashes = |other: &CalendarMapping| {
            other.user_id == mapping.user_id
                && other.id != mapping.id
                && ((mapping.source_calendar_id.is_some()
                    && other.source_calendar_id == mapping.source_calendar_id)
                    || (mapping.target_calendar_id.is_some()
                        && other.target_calendar_id == mapping.target_calendar_id))
        };
        if let Some(other) = self.calendar_mappings.iter().find(|m| clashes(m)) {
            return Err(CalMeshError::Store(format!(
                "calendar already mapped by '{}'",
                other.display_name
            )));
        }

        match self.calendar_mappings.iter_mut().find(|m| m.id == mapping.id) {
            Some(existing) => *existing = mapping,
            None => self.calendar_mappings.push(mapping),
        }
        Ok(())
    }

    pub fn delete_calendar_mapping(&mut self, user_id: &str, mapping_id: &str) {
        self.calendar_mappings
            .retain(|m| !(m.user_id == user_id && m.id == mapping_id));
        self.event_mappings
            .retain(|m| !(m.user_id == user_id && m.calendar_mapping_id == mapping_id));
    }

    pub fn event_mappings(&self, user_id: &str) -> Vec<EventMapping> {
        self.event_mappings
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn find_by_source(&self, user_id: &str, source_event_id: &str) -> Option<EventMapping> {
        self.event_mappings
            .iter()
            .find(|m| m.user_id == user_id && m.source_event_id == source_event_id)
            .cloned()
    }

    pub fn find_by_target(&self, user_id: &str, target_event_id: &str) -> Option<EventMapping> {
        self.event_mappings
            .iter()
            .find(|m| m.user_id == user_id && m.target_event_id == target_event_id)
            .cloned()
    }

    pub fn upsert_event_mapping(&mut self, mut mapping: EventMapping) -> CalMeshResult<()> {
        let target_taken = self.event_mappings.iter().any(|m| {
            m.user_id == mapping.user_id
                && m.target_event_id == mapping.target_event_id
                && m.source_event_id != mapping.source_event_id
        });
        if target_taken {
            return Err(CalMeshError::MappingConflict {
                event_id: mapping.target_event_id,
            });
        }

        match self.event_mappings.iter_mut().find(|m| {
            m.user_id == mapping.user_id && m.source_event_id == mapping.source_event_id
        }) {
            Some(existing) => {
                mapping.last_synced_at = mapping.last_synced_at.max(existing.last_synced_at);
                *existing = mapping;
            }
            None => self.event_mappings.push(mapping),
        }
        Ok(())
    }

    pub fn delete_event_mapping(&mut self, user_id: &str, source_event_id: &str) {
        self.event_mappings
            .retain(|m| !(m.user_id == user_id && m.source_event_id == source_event_id));
    }

    pub fn reset_last_synced(&mut self, user_id: &str) -> usize {
        let mut count = 0;
        for mapping in self.event_mappings.iter_mut().filter(|m| m.user_id == user_id) {
            mapping.last_synced_at = DateTime::UNIX_EPOCH;
            count += 1;
        }
        count
    }

    pub fn append_log(&mut self, entry: SyncLogEntry) {
        let user_id = entry.user_id.clone();
        self.logs.push(entry);

        let kept = self.logs.iter().filter(|e| e.user_id == user_id).count();
        if kept > MAX_LOG_ENTRIES_PER_USER {
            let mut excess = kept - MAX_LOG_ENTRIES_PER_USER;
            self.logs.retain(|e| {
                if excess > 0 && e.user_id == user_id {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }

    pub fn recent_logs(&self, user_id: &str, limit: usize) -> Vec<SyncLogEntry> {
        self.logs
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Process-local store. Everything is lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> StoreData {
        self.data.lock().await.clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn accounts(&self, user_id: &str) -> CalMeshResult<Vec<Account>> {
        Ok(self.data.lock().await.accounts(user_id))
    }

    async fn save_account(&self, account: Account) -> CalMeshResult<()> {
        self.data.lock().await.save_account(account);
        Ok(())
    }

    async fn delete_account(&self, user_id: &str, provider: Provider) -> CalMeshResult<()> {
        self.data.lock().await.delete_account(user_id, provider);
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn auto_sync_users(&self) -> CalMeshResult<Vec<UserId>> {
        Ok(self.data.lock().await.auto_sync_users())
    }

    async fn set_auto_sync(&self, user_id: &str, enabled: bool) -> CalMeshResult<()> {
        self.data.lock().await.set_auto_sync(user_id, enabled);
        Ok(())
    }
}

#[async_trait]
impl MappingStore for MemoryStore {
    async fn calendar_mappings(&self, user_id: &str) -> CalMeshResult<Vec<CalendarMapping>> {
        Ok(self.data.lock().await.calendar_mappings(user_id))
    }

    async fn upsert_calendar_mapping(&self, mapping: CalendarMapping) -> CalMeshResult<()> {
        self.data.lock().await.upsert_calendar_mapping(mapping)
    }

    async fn delete_calendar_mapping(&self, user_id: &str, mapping_id: &str) -> CalMeshResult<()> {
        self.data.lock().await.delete_calendar_mapping(user_id, mapping_id);
        Ok(())
    }

    async fn event_mappings(&self, user_id: &str) -> CalMeshResult<Vec<EventMapping>> {
        Ok(self.data.lock().await.event_mappings(user_id))
    }

    async fn find_by_source(&self, user_id: &str, source_event_id: &str) -> CalMeshResult<Option<EventMapping>> {
        Ok(self.data.lock().await.find_by_source(user_id, source_event_id))
    }

    async fn find_by_target(&self, user_id: &str, target_event_id: &str) -> CalMeshResult<Option<EventMapping>> {
        Ok(self.data.lock().await.find_by_target(user_id, target_event_id))
    }

    async fn upsert_event_mapping(&self, mapping: EventMapping) -> CalMeshResult<()> {
        self.data.lock().await.upsert_event_mapping(mapping)
    }

    async fn delete_event_mapping(&self, user_id: &str, source_event_id: &str) -> CalMeshResult<()> {
        self.data.lock().await.delete_event_mapping(user_id, source_event_id);
        Ok(())
    }

    async fn reset_last_synced(&self, user_id: &str) -> CalMeshResult<usize> {
        Ok(self.data.lock().await.reset_last_synced(user_id))
    }
}

#[async_trait]
impl SyncLogSink for MemoryStore {
    async fn append(&self, entry: SyncLogEntry) -> CalMeshResult<()> {
        self.data.lock().await.append_log(entry);
        Ok(())
    }

    async fn recent(&self, user_id: &str, limit: usize) -> CalMeshResult<Vec<SyncLogEntry>> {
        Ok(self.data.lock().await.recent_logs(user_id, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::{LogLevel, SyncTrigger};
    use chrono::{Duration, Utc};

    fn link(source: &str, target: &str) -> EventMapping {
        EventMapping {
            user_id: "u1".into(),
            calendar_mapping_id: "cm".into(),
            source_event_id: source.into(),
            target_event_id: target.into(),
            source_version: None,
            target_version: None,
            source_href: None,
            target_href: None,
            last_synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn event_mapping_keys_are_unique_on_both_sides() {
        let store = MemoryStore::new();
        store.upsert_event_mapping(link("g1", "c1")).await.unwrap();

        // Same source: an update, not a second row
        store.upsert_event_mapping(link("g1", "c1")).await.unwrap();
        assert_eq!(store.event_mappings("u1").await.unwrap().len(), 1);

        // Another source pointing at an already linked target
        let err = store.upsert_event_mapping(link("g2", "c1")).await.unwrap_err();
        assert!(matches!(err, CalMeshError::MappingConflict { ref event_id } if event_id == "c1"));

        // Other users are independent
        let mut other = link("g2", "c1");
        other.user_id = "u2".into();
        store.upsert_event_mapping(other).await.unwrap();
    }

    #[tokio::test]
    async fn last_synced_at_never_moves_backwards() {
        let store = MemoryStore::new();
        let fresh = link("g1", "c1");
        let newest = fresh.last_synced_at;
        store.upsert_event_mapping(fresh).await.unwrap();

        let mut older = link("g1", "c1");
        older.last_synced_at = newest - Duration::hours(1);
        older.target_version = Some("\"2\"".into());
        store.upsert_event_mapping(older).await.unwrap();

        let row = store.find_by_target("u1", "c1").await.unwrap().unwrap();
        assert_eq!(row.last_synced_at, newest);
        assert_eq!(row.target_version.as_deref(), Some("\"2\""));
    }

    #[tokio::test]
    async fn reset_sets_epoch() {
        let store = MemoryStore::new();
        store.upsert_event_mapping(link("g1", "c1")).await.unwrap();
        store.upsert_event_mapping(link("g2", "c2")).await.unwrap();

        assert_eq!(store.reset_last_synced("u1").await.unwrap(), 2);
        let rows = store.event_mappings("u1").await.unwrap();
        assert!(rows.iter().all(|r| r.last_synced_at == DateTime::UNIX_EPOCH));
    }

    #[tokio::test]
    async fn calendar_mapping_rejects_second_link_to_same_calendar() {
        let store = MemoryStore::new();
        let mut work = CalendarMapping::new("u1", "Work");
        work.source_calendar_id = Some("work@google".into());
        store.upsert_calendar_mapping(work.clone()).await.unwrap();

        let mut dup = CalendarMapping::new("u1", "Work copy");
        dup.source_calendar_id = Some("work@google".into());
        assert!(store.upsert_calendar_mapping(dup).await.is_err());

        // Re-saving the same mapping is fine
        work.enabled = false;
        store.upsert_calendar_mapping(work).await.unwrap();
    }

    #[tokio::test]
    async fn deleting_calendar_mapping_drops_its_event_mappings() {
        let store = MemoryStore::new();
        let work = CalendarMapping::new("u1", "Work");
        let mut row = link("g1", "c1");
        row.calendar_mapping_id = work.id.clone();
        store.upsert_calendar_mapping(work.clone()).await.unwrap();
        store.upsert_event_mapping(row).await.unwrap();
        store.upsert_event_mapping(link("g2", "c2")).await.unwrap();

        store.delete_calendar_mapping("u1", &work.id).await.unwrap();

        assert!(store.calendar_mappings("u1").await.unwrap().is_empty());
        let rows = store.event_mappings("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_event_id, "g2");
    }

    #[tokio::test]
    async fn recent_logs_newest_first() {
        let store = MemoryStore::new();
        for i in 0..3 {
            let entry = SyncLogEntry::new("u1", LogLevel::Info, format!("line {i}"), SyncTrigger::Auto);
            store.append(entry).await.unwrap();
        }
        store
            .append(SyncLogEntry::new("u2", LogLevel::Info, "other", SyncTrigger::Manual))
            .await
            .unwrap();

        let recent = store.recent("u1", 2).await.unwrap();
        let messages: Vec<_> = recent.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["line 2", "line 1"]);
    }

    #[test]
    fn log_is_capped_per_user() {
        let mut data = StoreData::default();
        for i in 0..MAX_LOG_ENTRIES_PER_USER + 5 {
            data.append_log(SyncLogEntry::new("u1", LogLevel::Info, format!("{i}"), SyncTrigger::Auto));
        }
        data.append_log(SyncLogEntry::new("u2", LogLevel::Info, "keep", SyncTrigger::Auto));

        assert_eq!(data.recent_logs("u1", usize::MAX).len(), MAX_LOG_ENTRIES_PER_USER);
        assert_eq!(data.recent_logs("u1", 1)[0].message, format!("{}", MAX_LOG_ENTRIES_PER_USER + 4));
        assert_eq!(data.recent_logs("u2", 10).len(), 1);
    }

    #[tokio::test]
    async fn saving_account_registers_auto_sync_user() {
        let store = MemoryStore::new();
        let account = Account::new(
            "u1",
            Provider::CalDav,
            crate::store::model::Credentials::Basic {
                username: "me@icloud.com".into(),
                password: "app-pw".into(),
                server_url: "https://caldav.icloud.com".into(),
            },
        );
        store.save_account(account.clone()).await.unwrap();
        store.save_account(account).await.unwrap();

        assert_eq!(store.accounts("u1").await.unwrap().len(), 1);
        assert_eq!(store.auto_sync_users().await.unwrap(), vec!["u1".to_string()]);

        store.set_auto_sync("u1", false).await.unwrap();
        assert!(store.auto_sync_users().await.unwrap().is_empty());
    }
}
