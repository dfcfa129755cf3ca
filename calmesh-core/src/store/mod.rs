//! Collaborator traits for persistence, plus an in-memory implementation.
//!
//! Sync code never talks to a database directly. It is handed trait objects
//! for credentials, users, mappings, the user-facing sync log and the job
//! queue, so the same reconciler runs against [`MemoryStore`] in tests and a
//! file or database backed store in production.

mod memory;
pub mod model;

pub use memory::{MemoryStore, StoreData};
pub use model::*;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CalMeshResult;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn accounts(&self, user_id: &str) -> CalMeshResult<Vec<Account>>;

    /// Insert or replace the account for `(user_id, provider)`.
    async fn save_account(&self, account: Account) -> CalMeshResult<()>;

    async fn delete_account(&self, user_id: &str, provider: Provider) -> CalMeshResult<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn auto_sync_users(&self) -> CalMeshResult<Vec<UserId>>;

    async fn set_auto_sync(&self, user_id: &str, enabled: bool) -> CalMeshResult<()>;
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn calendar_mappings(&self, user_id: &str) -> CalMeshResult<Vec<CalendarMapping>>;

    /// Insert or replace by id. Rejects a second mapping for the same
    /// source or target calendar of a user.
    async fn upsert_calendar_mapping(&self, mapping: CalendarMapping) -> CalMeshResult<()>;

    /// Removes the calendar mapping and its event mappings.
    async fn delete_calendar_mapping(&self, user_id: &str, mapping_id: &str) -> CalMeshResult<()>;

    async fn event_mappings(&self, user_id: &str) -> CalMeshResult<Vec<EventMapping>>;

    async fn find_by_source(&self, user_id: &str, source_event_id: &str) -> CalMeshResult<Option<EventMapping>>;

    async fn find_by_target(&self, user_id: &str, target_event_id: &str) -> CalMeshResult<Option<EventMapping>>;

    /// Insert or update the row keyed by `(user_id, source_event_id)`.
    ///
    /// Fails with `MappingConflict` when the target event is already linked
    /// to a different source event. `last_synced_at` never moves backwards.
    async fn upsert_event_mapping(&self, mapping: EventMapping) -> CalMeshResult<()>;

    async fn delete_event_mapping(&self, user_id: &str, source_event_id: &str) -> CalMeshResult<()>;

    /// Set every `last_synced_at` of the user to the epoch. Returns the number of rows touched.
    async fn reset_last_synced(&self, user_id: &str) -> CalMeshResult<usize>;
}

#[async_trait]
pub trait SyncLogSink: Send + Sync {
    async fn append(&self, entry: SyncLogEntry) -> CalMeshResult<()>;

    /// Most recent entries first.
    async fn recent(&self, user_id: &str, limit: usize) -> CalMeshResult<Vec<SyncLogEntry>>;
}

/// Work items for the job queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncJob {
    /// Enqueue a user job for every user with auto-sync enabled.
    FanOut,
    User { user_id: UserId, trigger: SyncTrigger },
}

impl SyncJob {
    pub fn user(user_id: impl Into<String>, trigger: SyncTrigger) -> Self {
        SyncJob::User {
            user_id: user_id.into(),
            trigger,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: SyncJob) -> CalMeshResult<()>;

    /// Enqueue `job` every `every`, starting after the first period.
    async fn register_repeat(&self, job: SyncJob, every: Duration) -> CalMeshResult<()>;
}
