pub mod auto_sync;
pub mod calendars;
pub mod config;
pub mod connect;
pub mod logs;
pub mod map;
pub mod reset;
pub mod sync;
pub mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use calmesh_core::store::{Account, CredentialStore, Provider};

use crate::config::Config;
use crate::lock::UserLocks;
use crate::store::FileStore;
use crate::sync::{ProviderFactory, Stores, SyncService};

/// Loaded config plus the opened store, shared by every command that touches user data.
pub struct App {
    pub config: Config,
    pub store: Arc<FileStore>,
}

impl App {
    pub fn load() -> Result<Self> {
        let config = Config::load()?;
        let path = config.store_path()?;
        let store = FileStore::open(&path)
            .with_context(|| format!("Failed to open store at {}", path.display()))?;

        Ok(App {
            config,
            store: Arc::new(store),
        })
    }

    pub fn factory(&self) -> ProviderFactory {
        ProviderFactory {
            google: self.config.google.clone(),
            caldav: self.config.caldav.clone(),
        }
    }

    /// Sync jobs from every calmesh process share the lock files next to the store.
    pub fn sync_service(&self) -> Result<SyncService> {
        let service = SyncService::new(
            Stores::shared(self.store.clone()),
            Arc::new(self.factory()),
            self.config.sync.clone(),
        );
        Ok(service.with_user_locks(UserLocks::new(self.config.lock_dir()?)))
    }

    /// The user's account for `provider`, or an error telling them how to connect one.
    pub async fn account(&self, user: &str, provider: Provider) -> Result<Account> {
        let accounts = self.store.accounts(user).await?;
        match accounts.into_iter().find(|a| a.provider == provider) {
            Some(account) => Ok(account),
            None => {
                let command = match provider {
                    Provider::Google => "connect-google",
                    Provider::CalDav => "connect-caldav",
                };
                anyhow::bail!(
                    "No {provider} account for '{user}'.\n\n\
                    Connect one with:\n  \
                    calmesh {command} {user} ..."
                );
            }
        }
    }
}
