//! Per-user lock files shared by every calmesh process on this machine.
//!
//! The worker and a manual `calmesh sync` each hold a user's lock for the
//! whole sync job, so the same user is never reconciled twice at once.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;

use calmesh_core::{CalMeshError, CalMeshResult};
use fs2::FileExt;
use tracing::debug;

/// Directory of `<user>.lock` files.
#[derive(Debug, Clone)]
pub struct UserLocks {
    dir: PathBuf,
}

/// Releases the user's lock when dropped.
#[derive(Debug)]
pub struct UserLockGuard {
    _file: File,
}

impl UserLocks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        UserLocks { dir: dir.into() }
    }

    /// Take the user's lock without waiting.
    ///
    /// Fails with [`CalMeshError::SyncInProgress`] while another holder has it.
    pub fn try_acquire(&self, user_id: &str) -> CalMeshResult<UserLockGuard> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(lock_file_name(user_id));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        file.try_lock_exclusive().map_err(|e| {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                CalMeshError::SyncInProgress(user_id.to_string())
            } else {
                CalMeshError::Io(e)
            }
        })?;

        debug!(user_id, path = %path.display(), "acquired sync lock");
        Ok(UserLockGuard { _file: file })
    }
}

/// User ids are percent-escaped so any id maps to one distinct, safe file name.
fn lock_file_name(user_id: &str) -> String {
    let mut name = String::with_capacity(user_id.len() + 5);
    for byte in user_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    name.push_str(".lock");
    name
}
