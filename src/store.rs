//! File-backed store: the whole `StoreData` as one JSON document.
//!
//! Several calmesh processes may share one store file (the worker plus
//! one-off commands). Every access first reloads the document if another
//! process replaced it, and writes are serialized through a sibling lock file.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use calmesh_core::store::{
    Account, CalendarMapping, CredentialStore, EventMapping, MappingStore, Provider, StoreData, SyncLogEntry,
    SyncLogSink, UserId, UserStore,
};
use calmesh_core::{CalMeshError, CalMeshResult};
use fs2::FileExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Every mutation is applied to a copy, written to disk, and only then
/// becomes visible, so a failed write leaves both file and memory unchanged.
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<Cached>,
}

/// The document as last read or written, and which file version it came from.
struct Cached {
    data: StoreData,
    stamp: Option<FileStamp>,
}

/// Identifies one version of the store file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file doesn't exist yet.
    pub fn open(path: impl Into<PathBuf>) -> CalMeshResult<Self> {
        let path = path.into();
        let cache = load(&path)?;

        Ok(FileStore {
            path,
            cache: Mutex::new(cache),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> CalMeshResult<T> {
        let mut cache = self.cache.lock().await;
        refresh(&self.path, &mut cache)?;
        Ok(f(&cache.data))
    }

    async fn write<T>(&self, f: impl FnOnce(&mut StoreData) -> CalMeshResult<T>) -> CalMeshResult<T> {
        let mut cache = self.cache.lock().await;
        let _lock = self.lock_file().await?;
        refresh(&self.path, &mut cache)?;

        let mut next = cache.data.clone();
        let result = f(&mut next)?;
        persist(&self.path, &next)?;
        cache.stamp = stamp(&self.path)?;
        cache.data = next;

        Ok(result)
    }

    /// Exclusive lock on `<store>.lock`, waiting for other processes' writes.
    async fn lock_file(&self) -> CalMeshResult<File> {
        let path = self.path.with_extension("lock");
        tokio::task::spawn_blocking(move || -> CalMeshResult<File> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| CalMeshError::Store(format!("store lock task failed: {e}")))?
    }
}

fn stamp(path: &Path) -> CalMeshResult<Option<FileStamp>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(FileStamp {
            modified: meta.modified()?,
            len: meta.len(),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn load(path: &Path) -> CalMeshResult<Cached> {
    let stamp = stamp(path)?;
    let data = match stamp {
        Some(_) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => StoreData::default(),
    };
    Ok(Cached { data, stamp })
}

/// Reload when another process has replaced the file since we last saw it.
fn refresh(path: &Path, cache: &mut Cached) -> CalMeshResult<()> {
    if stamp(path)? != cache.stamp {
        debug!(path = %path.display(), "store changed on disk, reloading");
        *cache = load(path)?;
    }
    Ok(())
}

/// Write to a sibling temp file, then rename over the store.
fn persist(path: &Path, data: &StoreData) -> CalMeshResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = serde_json::to_vec_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;

    // Set to owner-only (0600) since file contains credentials:
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp, path).map_err(|e| CalMeshError::Store(format!("failed to replace {}: {e}", path.display())))?;
    debug!(path = %path.display(), "store written");
    Ok(())
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn accounts(&self, user_id: &str) -> CalMeshResult<Vec<Account>> {
        self.read(|d| d.accounts(user_id)).await
    }

    async fn save_account(&self, account: Account) -> CalMeshResult<()> {
        self.write(|d| {
            d.save_account(account);
            Ok(())
        })
        .await
    }

    async fn delete_account(&self, user_id: &str, provider: Provider) -> CalMeshResult<()> {
        self.write(|d| {
            d.delete_account(user_id, provider);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl UserStore for FileStore {
    async fn auto_sync_users(&self) -> CalMeshResult<Vec<UserId>> {
        self.read(StoreData::auto_sync_users).await
    }

    async fn set_auto_sync(&self, user_id: &str, enabled: bool) -> CalMeshResult<()> {
        self.write(|d| {
            d.set_auto_sync(user_id, enabled);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl MappingStore for FileStore {
    async fn calendar_mappings(&self, user_id: &str) -> CalMeshResult<Vec<CalendarMapping>> {
        self.read(|d| d.calendar_mappings(user_id)).await
    }

    async fn upsert_calendar_mapping(&self, mapping: CalendarMapping) -> CalMeshResult<()> {
        self.write(|d| d.upsert_calendar_mapping(mapping)).await
    }

    async fn delete_calendar_mapping(&self, user_id: &str, mapping_id: &str) -> CalMeshResult<()> {
        self.write(|d| {
            d.delete_calendar_mapping(user_id, mapping_id);
            Ok(())
        })
        .await
    }

    async fn event_mappings(&self, user_id: &str) -> CalMeshResult<Vec<EventMapping>> {
        self.read(|d| d.event_mappings(user_id)).await
    }

    async fn find_by_source(&self, user_id: &str, source_event_id: &str) -> CalMeshResult<Option<EventMapping>> {
        self.read(|d| d.find_by_source(user_id, source_event_id)).await
    }

    async fn find_by_target(&self, user_id: &str, target_event_id: &str) -> CalMeshResult<Option<EventMapping>> {
        self.read(|d| d.find_by_target(user_id, target_event_id)).await
    }

    async fn upsert_event_mapping(&self, mapping: EventMapping) -> CalMeshResult<()> {
        self.write(|d| d.upsert_event_mapping(mapping)).await
    }

    async fn delete_event_mapping(&self, user_id: &str, source_event_id: &str) -> CalMeshResult<()> {
        self.write(|d| {
            d.delete_event_mapping(user_id, source_event_id);
            Ok(())
        })
        .await
    }

    async fn reset_last_synced(&self, user_id: &str) -> CalMeshResult<usize> {
        self.write(|d| Ok(d.reset_last_synced(user_id))).await
    }
}

#[async_trait]
impl SyncLogSink for FileStore {
    async fn append(&self, entry: SyncLogEntry) -> CalMeshResult<()> {
        self.write(|d| {
            d.append_log(entry);
            Ok(())
        })
        .await
    }

    async fn recent(&self, user_id: &str, limit: usize) -> CalMeshResult<Vec<SyncLogEntry>> {
        self.read(|d| d.recent_logs(user_id, limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmesh_core::store::{Credentials, LogLevel, SyncTrigger};
    use chrono::Utc;

    fn caldav_account() -> Account {
        Account::new(
            "alice",
            Provider::CalDav,
            Credentials::Basic {
                username: "alice@icloud.com".into(),
                password: "app-password".into(),
                server_url: "https://caldav.icloud.com".into(),
            },
        )
    }

    fn row(source: &str, target: &str) -> EventMapping {
        EventMapping {
            user_id: "alice".into(),
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
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("store.json");

        let store = FileStore::open(&path).unwrap();
        store.save_account(caldav_account()).await.unwrap();
        store.upsert_event_mapping(row("g1", "c1")).await.unwrap();
        store
            .append(SyncLogEntry::new("alice", LogLevel::Info, "Starting sync job", SyncTrigger::Manual))
            .await
            .unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        let accounts = reopened.accounts("alice").await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].provider, Provider::CalDav);
        assert!(reopened.find_by_target("alice", "c1").await.unwrap().is_some());
        assert_eq!(reopened.recent("alice", 10).await.unwrap().len(), 1);
        assert_eq!(reopened.auto_sync_users().await.unwrap(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn rejected_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::open(&path).unwrap();
        store.upsert_event_mapping(row("g1", "c1")).await.unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let err = store.upsert_event_mapping(row("g2", "c1")).await.unwrap_err();
        assert!(matches!(err, CalMeshError::MappingConflict { .. }));

        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        assert!(store.find_by_source("alice", "g2").await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::open(&path).unwrap();
        store.save_account(caldav_account()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(FileStore::open(&path), Err(CalMeshError::Serialization(_))));
    }

    #[tokio::test]
    async fn two_handles_see_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        // Like the worker and a one-off command, both opened before either writes
        let worker = FileStore::open(&path).unwrap();
        let command = FileStore::open(&path).unwrap();

        command.upsert_event_mapping(row("g1", "c1")).await.unwrap();
        assert!(worker.find_by_source("alice", "g1").await.unwrap().is_some());

        worker.upsert_event_mapping(row("g2", "c2")).await.unwrap();
        command.save_account(caldav_account()).await.unwrap();

        for store in [&worker, &command] {
            assert_eq!(store.event_mappings("alice").await.unwrap().len(), 2);
            assert_eq!(store.accounts("alice").await.unwrap().len(), 1);
        }

        // A conflicting row written through the other handle is still rejected
        let err = worker.upsert_event_mapping(row("g3", "c1")).await.unwrap_err();
        assert!(matches!(err, CalMeshError::MappingConflict { .. }));
    }
}
