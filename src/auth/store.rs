//! Durable token storage.
//!
//! The session state machine is the single source of truth; this store is
//! its durable mirror, so a saved session survives process restarts. The
//! access token and user identity live in a JSON document in the platform
//! cache directory, while the longer-lived refresh credential is filed in
//! the OS keychain when one is available.
//!
//! Storage failures are never surfaced as errors: the store degrades to
//! the in-process mirror and a fresh start simply finds no session.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::session::User;

/// Session file name in the storage directory
const SESSION_FILE: &str = "session.json";

/// Keychain service under which the refresh credential is filed
const KEYRING_SERVICE: &str = "shopfront";

/// Keychain entry name for the refresh credential
const KEYRING_ENTRY: &str = "refresh-token";

/// The persisted shape of an authenticated session.
///
/// Identity is stored alongside the token so a hydrated session is whole:
/// a token without its user would be unusable to every collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub user: User,
    pub access_token: String,
    /// Present in the file only when the keychain was unavailable (or
    /// disabled) at save time; otherwise the keychain holds it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub saved_at: DateTime<Utc>,
}

pub struct TokenStore {
    dir: PathBuf,
    keychain: bool,
    /// Write-through mirror; disk and keychain are best-effort behind it.
    memory: Mutex<Option<StoredSession>>,
}

impl TokenStore {
    /// Open the store rooted at `dir`, reading any previously saved
    /// session from disk. `keychain` controls whether the refresh
    /// credential goes through the OS keychain (headless environments and
    /// tests disable it).
    pub fn new(dir: PathBuf, keychain: bool) -> Self {
        let initial = Self::read_disk(&dir, keychain);
        debug!(?dir, found = initial.is_some(), "token store opened");
        Self {
            dir,
            keychain,
            memory: Mutex::new(initial),
        }
    }

    /// Current stored session, if any.
    pub fn load(&self) -> Option<StoredSession> {
        self.lock_memory().clone()
    }

    /// Replace the stored session. Persistence is best-effort; the mirror
    /// is updated first so the new session is visible to the next `load`
    /// even when disk or keychain writes fail.
    pub fn save(&self, session: StoredSession) {
        *self.lock_memory() = Some(session.clone());
        self.persist(session);
    }

    /// Remove the stored session from memory, disk, and keychain.
    pub fn clear(&self) {
        *self.lock_memory() = None;

        if self.keychain {
            Self::keyring_delete();
        }
        let path = self.session_path();
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(error = %e, "failed to remove session file");
            }
        }
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, Option<StoredSession>> {
        self.memory
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    fn read_disk(dir: &PathBuf, keychain: bool) -> Option<StoredSession> {
        let path = dir.join(SESSION_FILE);
        if !path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to read session file");
                return None;
            }
        };
        let mut session: StoredSession = match serde_json::from_str(&contents) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to parse session file, ignoring it");
                return None;
            }
        };
        if session.refresh_token.is_none() && keychain {
            session.refresh_token = Self::keyring_get();
        }
        Some(session)
    }

    fn persist(&self, mut session: StoredSession) {
        // File the refresh credential in the keychain; on failure it stays
        // in the JSON document so the next load still finds it.
        if self.keychain {
            match session.refresh_token.take() {
                Some(refresh) => {
                    if !Self::keyring_set(&refresh) {
                        session.refresh_token = Some(refresh);
                    }
                }
                None => Self::keyring_delete(),
            }
        }

        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!(error = %e, "failed to create session directory");
            return;
        }
        let contents = match serde_json::to_string_pretty(&session) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to serialize session");
                return;
            }
        };
        if let Err(e) = std::fs::write(self.session_path(), contents) {
            warn!(error = %e, "failed to write session file");
        }
    }

    fn keyring_entry() -> Option<Entry> {
        match Entry::new(KEYRING_SERVICE, KEYRING_ENTRY) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "keychain unavailable");
                None
            }
        }
    }

    fn keyring_set(refresh: &str) -> bool {
        let Some(entry) = Self::keyring_entry() else {
            return false;
        };
        match entry.set_password(refresh) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to store refresh token in keychain");
                false
            }
        }
    }

    fn keyring_get() -> Option<String> {
        Self::keyring_entry()?.get_password().ok()
    }

    fn keyring_delete() {
        if let Some(entry) = Self::keyring_entry() {
            // Missing entries are fine; anything else is worth a warning.
            if let Err(e) = entry.delete_credential() {
                if !matches!(e, keyring::Error::NoEntry) {
                    warn!(error = %e, "failed to remove refresh token from keychain");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> StoredSession {
        StoredSession {
            user: User {
                id: 7,
                email: "u@x.com".to_string(),
            },
            access_token: "access-abc".to_string(),
            refresh_token: Some("refresh-xyz".to_string()),
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().to_path_buf(), false);

        assert!(store.load().is_none());
        store.save(sample_session());

        let loaded = store.load().expect("session should be stored");
        assert_eq!(loaded.access_token, "access-abc");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-xyz"));
        assert_eq!(loaded.user.email, "u@x.com");
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().to_path_buf(), false);

        store.save(sample_session());
        store.clear();
        assert!(store.load().is_none());
        assert!(!dir.path().join(SESSION_FILE).exists());

        // Clearing an already empty store is a no-op, not an error.
        store.clear();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = TokenStore::new(dir.path().to_path_buf(), false);
            store.save(sample_session());
        }
        let reopened = TokenStore::new(dir.path().to_path_buf(), false);
        let loaded = reopened.load().expect("session should survive reopen");
        assert_eq!(loaded.access_token, "access-abc");
    }

    #[test]
    fn test_corrupt_file_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SESSION_FILE), "{not json").unwrap();

        let store = TokenStore::new(dir.path().to_path_buf(), false);
        assert!(store.load().is_none());
    }

    #[test]
    fn test_unwritable_dir_degrades_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();

        // The session directory path collides with a regular file, so every
        // disk write fails; save/load must still work within the process.
        let store = TokenStore::new(blocker.join("sessions"), false);
        store.save(sample_session());
        assert_eq!(
            store.load().map(|s| s.access_token).as_deref(),
            Some("access-abc")
        );
    }
}
