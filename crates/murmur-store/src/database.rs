//! Database connection management and the password gate.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. Values are encrypted at the
//! application layer (see [`murmur_shared::crypto::encrypt`]) with a key
//! derived from the user's password; nothing can be read or written until
//! [`Database::set_pass`] or a successful [`Database::verify_pass`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration;

use directories::ProjectDirs;
use rusqlite::Connection;

use murmur_shared::constants::{APP_NAME, KDF_CONTEXT_STORE_KEY, STORE_OPEN_TIMEOUT_SECS};
use murmur_shared::crypto::{self, SymmetricKey};

use crate::entries::Key;
use crate::error::{Result, StoreError};
use crate::migrations;
use crate::tables;

/// Known plaintext written at password-set time.
const CANARY: &[u8] = b"murmur is a program for people";
const CANARY_KEY: &str = "canary";

/// Encrypted table store over a single SQLite file.
///
/// Safe to share between tasks behind an `Arc`; every call takes the
/// connection lock for its duration.
pub struct Database {
    conn: Mutex<Connection>,
    key: RwLock<Option<SymmetricKey>>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/murmur/murmur.db`
    /// - macOS:   `~/Library/Application Support/org.murmur.murmur/murmur.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\murmur\murmur\data\murmur.db`
    pub fn new() -> Result<Self> {
        Self::open_at(&default_path()?)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(STORE_OPEN_TIMEOUT_SECS))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        let db = Self {
            conn: Mutex::new(conn),
            key: RwLock::new(None),
        };
        for table in [tables::USER, tables::CONTACTS, tables::MESSAGES] {
            db.create_table(table, None)?;
        }
        Ok(db)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn().path().map(PathBuf::from)
    }

    // ------------------------------------------------------------------
    // Password
    // ------------------------------------------------------------------

    /// Derive the encryption key from `password` and hold it.
    ///
    /// Writes the canary under the new key. Does not check the password
    /// against anything already stored; use it only for a fresh store.
    pub fn set_pass(&self, password: &str) -> Result<()> {
        let key = crypto::derive_key_from_passphrase(password.as_bytes(), KDF_CONTEXT_STORE_KEY);
        *self.key.write().unwrap_or_else(|e| e.into_inner()) = Some(key);
        self.put(tables::USER, None, Key::Name(CANARY_KEY), CANARY)?;
        tracing::info!("store password set");
        Ok(())
    }

    /// Try `password` against the canary. On success the derived key is
    /// adopted; on failure nothing changes.
    pub fn verify_pass(&self, password: &str) -> bool {
        let stored = match self.get_raw(tables::USER, None, Key::Name(CANARY_KEY)) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "no password canary in store");
                return false;
            }
        };

        let key = crypto::derive_key_from_passphrase(password.as_bytes(), KDF_CONTEXT_STORE_KEY);
        match crypto::decrypt(&key, &stored) {
            Ok(plain) if plain == CANARY => {
                *self.key.write().unwrap_or_else(|e| e.into_inner()) = Some(key);
                true
            }
            _ => false,
        }
    }

    /// Whether a password was ever set on this file.
    pub fn is_initialized(&self) -> bool {
        self.get_raw(tables::USER, None, Key::Name(CANARY_KEY)).is_ok()
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    // ------------------------------------------------------------------
    // Crate internals
    // ------------------------------------------------------------------

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn key(&self) -> Result<SymmetricKey> {
        self.key
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .ok_or(StoreError::NotUnlocked)
    }
}

fn default_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("org", APP_NAME, APP_NAME).ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().join(format!("{APP_NAME}.db")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).expect("should open");
        (dir, db)
    }

    #[test]
    fn default_path_is_named_after_the_app() {
        // Headless environments may have no home directory at all.
        if let Ok(path) = default_path() {
            assert!(path.ends_with("murmur.db"));
        }
    }

    #[test]
    fn open_creates_base_tables() {
        let (_dir, db) = open();
        assert!(db.path().is_some());
        db.set_pass("pw").unwrap();
        for table in [tables::CONTACTS, tables::MESSAGES] {
            assert!(db.list(table, None).unwrap().is_empty());
        }
    }

    #[test]
    fn locked_store_refuses_reads_and_writes() {
        let (_dir, db) = open();
        assert!(!db.is_unlocked());
        assert!(matches!(
            db.put(tables::CONTACTS, None, Key::Id(1), b"x"),
            Err(StoreError::NotUnlocked)
        ));
        assert!(matches!(
            db.get(tables::CONTACTS, None, Key::Id(1)),
            Err(StoreError::NotUnlocked)
        ));
    }

    #[test]
    fn verify_pass_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let db = Database::open_at(&path).unwrap();
            assert!(!db.is_initialized());
            db.set_pass("pass1").unwrap();
            db.put(tables::CONTACTS, None, Key::Id(1), b"hello").unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        assert!(db.is_initialized());
        assert!(!db.verify_pass("wrong"));
        assert!(!db.is_unlocked());
        assert!(db.verify_pass("pass1"));
        assert_eq!(db.get(tables::CONTACTS, None, Key::Id(1)).unwrap(), b"hello");
    }

    #[test]
    fn verify_pass_without_canary_is_false() {
        let (_dir, db) = open();
        assert!(!db.verify_pass("anything"));
    }
}
