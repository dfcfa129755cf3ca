//! Per-user sync jobs: load accounts and mappings, resolve calendars, fetch
//! both windows and hand them to the reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use calmesh_core::store::{
    Account, CalendarMapping, CredentialStore, Credentials, JobQueue, LogLevel, MappingStore, Provider, SyncJob,
    SyncLogEntry, SyncLogSink, SyncTrigger, UserStore,
};
use calmesh_core::sync::{MappingSet, ReconcileReport, Reconciler, SyncWindows};
use calmesh_core::{CalMeshError, CalMeshResult, CalendarRemote, DateRange};
use calmesh_provider_caldav::{CaldavCredentials, CaldavRemote};
use calmesh_provider_google::{GoogleConfig, GoogleRemote, GoogleTokens, TokenRefreshHook};
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::{CaldavSettings, SyncSettings};
use crate::lock::{UserLockGuard, UserLocks};
use crate::queue::JobHandler;

/// Builds the two calendar backends of a user from their accounts.
pub trait RemoteFactory: Send + Sync {
    /// The REST (source) side. `hook` persists refreshed tokens.
    fn source(&self, account: &Account, hook: Arc<dyn TokenRefreshHook>) -> CalMeshResult<Arc<dyn CalendarRemote>>;

    /// The CalDAV (target) side.
    fn target(&self, account: &Account) -> CalMeshResult<Arc<dyn CalendarRemote>>;
}

/// Production factory: Google for the source, CalDAV for the target.
pub struct ProviderFactory {
    pub google: GoogleConfig,
    pub caldav: CaldavSettings,
}

impl RemoteFactory for ProviderFactory {
    fn source(&self, account: &Account, hook: Arc<dyn TokenRefreshHook>) -> CalMeshResult<Arc<dyn CalendarRemote>> {
        let Credentials::OAuth {
            access_token,
            refresh_token,
            expires_at,
        } = &account.credentials
        else {
            return Err(CalMeshError::Auth("Google account has no OAuth tokens".into()));
        };

        let tokens = GoogleTokens {
            access_token: access_token.clone(),
            refresh_token: refresh_token.clone(),
            expires_at: *expires_at,
        };
        Ok(Arc::new(GoogleRemote::new(self.google.clone(), tokens, hook)?))
    }

    fn target(&self, account: &Account) -> CalMeshResult<Arc<dyn CalendarRemote>> {
        let Credentials::Basic {
            username,
            password,
            server_url,
        } = &account.credentials
        else {
            return Err(CalMeshError::Auth("CalDAV account has no username/password".into()));
        };

        let credentials = CaldavCredentials {
            server_url: server_url.clone(),
            username: username.clone(),
            password: password.clone(),
        };
        Ok(Arc::new(
            CaldavRemote::new(credentials)?.with_vevent_only(self.caldav.vevent_only),
        ))
    }
}

/// Saves refreshed Google tokens back to the user's account.
pub struct StoreRefreshHook {
    user_id: String,
    credentials: Arc<dyn CredentialStore>,
}

impl StoreRefreshHook {
    pub fn new(user_id: impl Into<String>, credentials: Arc<dyn CredentialStore>) -> Self {
        StoreRefreshHook {
            user_id: user_id.into(),
            credentials,
        }
    }
}

#[async_trait]
impl TokenRefreshHook for StoreRefreshHook {
    async fn on_refresh(&self, tokens: &GoogleTokens) -> CalMeshResult<()> {
        let account = Account::new(
            self.user_id.clone(),
            Provider::Google,
            Credentials::OAuth {
                access_token: tokens.access_token.clone(),
                refresh_token: tokens.refresh_token.clone(),
                expires_at: tokens.expires_at,
            },
        );
        self.credentials.save_account(account).await
    }
}

/// The collaborators a sync job reads and writes.
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub users: Arc<dyn UserStore>,
    pub mappings: Arc<dyn MappingStore>,
    pub log: Arc<dyn SyncLogSink>,
}

impl Stores {
    /// All four roles served by one store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: CredentialStore + UserStore + MappingStore + SyncLogSink + 'static,
    {
        Stores {
            credentials: store.clone(),
            users: store.clone(),
            mappings: store.clone(),
            log: store,
        }
    }
}

pub struct SyncService {
    stores: Stores,
    factory: Arc<dyn RemoteFactory>,
    settings: SyncSettings,
    locks: Option<UserLocks>,
}

impl SyncService {
    pub fn new(stores: Stores, factory: Arc<dyn RemoteFactory>, settings: SyncSettings) -> Self {
        SyncService {
            stores,
            factory,
            settings,
            locks: None,
        }
    }

    /// Hold the user's lock file for the duration of each sync job.
    pub fn with_user_locks(mut self, locks: UserLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Enqueue an automatic job for every user with auto-sync on.
    pub async fn fan_out(&self, queue: &dyn JobQueue) -> CalMeshResult<usize> {
        let users = self.stores.users.auto_sync_users().await?;
        for user_id in &users {
            queue.enqueue(SyncJob::user(user_id.clone(), SyncTrigger::Auto)).await?;
        }
        info!(users = users.len(), "fanned out sync jobs");
        Ok(users.len())
    }

    /// Run one user's sync job.
    ///
    /// Per-calendar failures are logged and skipped; only failures outside
    /// a calendar mapping abort the job and are returned. A user whose lock is
    /// held elsewhere fails with [`CalMeshError::SyncInProgress`] before
    /// anything is read or written.
    pub async fn sync_user(&self, user_id: &str, trigger: SyncTrigger) -> CalMeshResult<ReconcileReport> {
        let _lock = self.lock_user(user_id).inspect_err(|e| warn!(user_id, %trigger, "not syncing: {e}"))?;

        match self.run_user(user_id, trigger).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(user_id, "sync job failed: {e}");
                self.log_with(user_id, LogLevel::Error, "Sync job failed", trigger, json!({ "error": e.to_string() }))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_user(&self, user_id: &str, trigger: SyncTrigger) -> CalMeshResult<ReconcileReport> {
        info!(user_id, %trigger, "starting sync job");
        self.log(user_id, LogLevel::Info, "Starting sync job", trigger).await;

        let mut report = ReconcileReport::default();

        let accounts = self.stores.credentials.accounts(user_id).await?;
        let google = accounts.iter().find(|a| a.provider == Provider::Google);
        let caldav = accounts.iter().find(|a| a.provider == Provider::CalDav);
        let (Some(google), Some(caldav)) = (google, caldav) else {
            warn!(user_id, "missing provider account");
            self.log(user_id, LogLevel::Error, "Missing Google or CalDAV account", trigger).await;
            return Ok(report);
        };

        let hook = Arc::new(StoreRefreshHook::new(user_id, self.stores.credentials.clone()));
        let source = self.factory.source(google, hook)?;
        let target = self.factory.target(caldav)?;

        let calendar_mappings: Vec<CalendarMapping> = self
            .stores
            .mappings
            .calendar_mappings(user_id)
            .await?
            .into_iter()
            .filter(|m| m.enabled)
            .collect();
        if calendar_mappings.is_empty() {
            self.log(user_id, LogLevel::Warn, "No calendar mappings enabled", trigger).await;
            return Ok(report);
        }

        let mut event_mappings = MappingSet::load(user_id, &*self.stores.mappings).await?;
        let windows = self.windows(event_mappings.is_empty());

        for mapping in calendar_mappings {
            let calendar_report = self
                .sync_calendar(mapping, &*source, &*target, &windows, &mut event_mappings, trigger)
                .await;
            report.merge(calendar_report);
        }

        let totals = report.totals();
        info!(user_id, %totals, "sync job finished");
        self.log_with(
            user_id,
            LogLevel::Success,
            format!("Sync completed: {totals}"),
            trigger,
            json!(report.lines()),
        )
        .await;

        Ok(report)
    }

    fn lock_user(&self, user_id: &str) -> CalMeshResult<Option<UserLockGuard>> {
        self.locks
            .as_ref()
            .map(|locks| locks.try_acquire(user_id))
            .transpose()
    }

    /// First-ever sync (no event mappings) looks further back.
    fn windows(&self, first_sync: bool) -> SyncWindows {
        let lookback = if first_sync {
            self.settings.initial_lookback_days
        } else {
            self.settings.lookback_days
        };
        let now = Utc::now();

        SyncWindows {
            source: DateRange::since(now - Duration::days(lookback)),
            target: DateRange::around(now, lookback, self.settings.lookahead_days),
        }
    }

    async fn sync_calendar(
        &self,
        mapping: CalendarMapping,
        source: &dyn CalendarRemote,
        target: &dyn CalendarRemote,
        windows: &SyncWindows,
        event_mappings: &mut MappingSet,
        trigger: SyncTrigger,
    ) -> ReconcileReport {
        let user_id = mapping.user_id.clone();
        let name = mapping.display_name.clone();

        let mapping = match self.resolve_calendars(mapping, source, target).await {
            Ok(mapping) => mapping,
            Err(e) => {
                error!(user_id = %user_id, calendar = %name, "failed to resolve calendars: {e}");
                self.log(&user_id, LogLevel::Error, format!("Failed to resolve calendars for {name}: {e}"), trigger)
                    .await;
                return ReconcileReport::default();
            }
        };

        let fetched = match (&mapping.source_calendar_id, &mapping.target_calendar_id) {
            (Some(source_id), Some(target_id)) => {
                let source_events = source.list_events(source_id, &windows.source).await;
                match source_events {
                    Ok(source_events) => target
                        .list_events(target_id, &windows.target)
                        .await
                        .map(|target_events| (source_events, target_events)),
                    Err(e) => Err(e),
                }
            }
            _ => Err(CalMeshError::CalendarNotFound(name.clone())),
        };

        let (source_events, target_events) = match fetched {
            Ok(events) => events,
            Err(e) if e.is_gone() => {
                warn!(user_id = %user_id, calendar = %name, "calendar removed upstream, deleting mapping");
                if let Err(e) = self.stores.mappings.delete_calendar_mapping(&user_id, &mapping.id).await {
                    error!(user_id = %user_id, calendar = %name, "failed to delete mapping: {e}");
                }
                self.log(
                    &user_id,
                    LogLevel::Warn,
                    format!("Calendar {name} no longer exists; mapping removed"),
                    trigger,
                )
                .await;
                return ReconcileReport::default();
            }
            Err(e) => {
                error!(user_id = %user_id, calendar = %name, "failed to fetch events: {e}");
                self.log(&user_id, LogLevel::Error, format!("Failed to fetch events for {name}: {e}"), trigger)
                    .await;
                return ReconcileReport::default();
            }
        };

        info!(
            user_id = %user_id,
            calendar = %name,
            source_events = source_events.len(),
            target_events = target_events.len(),
            "reconciling"
        );

        let reconciler = Reconciler::new(&mapping, source, target, &*self.stores.mappings);
        match reconciler
            .run(&source_events, &target_events, windows, event_mappings)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!(user_id = %user_id, calendar = %name, "reconcile failed: {e}");
                self.log(&user_id, LogLevel::Error, format!("Failed to sync {name}: {e}"), trigger)
                    .await;
                ReconcileReport::default()
            }
        }
    }

    /// Fill in missing calendar ids by display name, creating calendars that
    /// don't exist yet. Resolved ids are persisted right away.
    async fn resolve_calendars(
        &self,
        mut mapping: CalendarMapping,
        source: &dyn CalendarRemote,
        target: &dyn CalendarRemote,
    ) -> CalMeshResult<CalendarMapping> {
        let mut changed = false;

        if mapping.source_calendar_id.is_none() {
            mapping.source_calendar_id = Some(find_or_create(source, &mapping.display_name).await?);
            changed = true;
        }
        if mapping.target_calendar_id.is_none() {
            mapping.target_calendar_id = Some(find_or_create(target, &mapping.display_name).await?);
            changed = true;
        }

        if changed {
            self.stores
                .mappings
                .upsert_calendar_mapping(mapping.clone())
                .await?;
        }
        Ok(mapping)
    }

    async fn log(&self, user_id: &str, level: LogLevel, message: impl Into<String>, trigger: SyncTrigger) {
        self.append(SyncLogEntry::new(user_id, level, message, trigger)).await;
    }

    async fn log_with(
        &self,
        user_id: &str,
        level: LogLevel,
        message: impl Into<String>,
        trigger: SyncTrigger,
        details: serde_json::Value,
    ) {
        self.append(SyncLogEntry::new(user_id, level, message, trigger).with_details(details))
            .await;
    }

    async fn append(&self, entry: SyncLogEntry) {
        if let Err(e) = self.stores.log.append(entry).await {
            warn!("failed to write sync log: {e}");
        }
    }
}

async fn find_or_create(remote: &dyn CalendarRemote, display_name: &str) -> CalMeshResult<String> {
    let calendars = remote.list_calendars().await?;
    if let Some(existing) = calendars.into_iter().find(|c| c.display_name == display_name) {
        return Ok(existing.id);
    }

    info!(remote = remote.name(), calendar = display_name, "creating calendar");
    Ok(remote.create_calendar(display_name).await?.id)
}

#[async_trait]
impl JobHandler for SyncService {
    async fn handle(&self, job: &SyncJob, queue: &dyn JobQueue) -> CalMeshResult<()> {
        match job {
            SyncJob::FanOut => self.fan_out(queue).await.map(|_| ()),
            SyncJob::User { user_id, trigger } => self.sync_user(user_id, *trigger).await.map(|_| ()),
        }
    }
}
