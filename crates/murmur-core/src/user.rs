//! The local user: display name and X25519 identity, created once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use murmur_shared::constants::{NAME_MAX_LEN, RECORD_VERSION};
use murmur_shared::identity::{Identity, IdentityExport};
use murmur_shared::types::PeerAddress;
use murmur_store::{tables, Database, Key, StoreError};

use crate::error::{CoreError, Result};

const USER_KEY: &str = "base";
const ADDRESS_KEY: &str = "address";

pub(crate) fn record_version() -> u32 {
    RECORD_VERSION
}

#[derive(Serialize, Deserialize)]
pub struct User {
    #[serde(default = "record_version")]
    pub version: u32,
    pub name: String,
    identity: IdentityExport,
    pub creation_time: DateTime<Utc>,
}

impl User {
    /// Generate a fresh identity named `name` and persist it.
    pub fn create(db: &Database, name: &str) -> Result<Self> {
        let name = validate_name(name)?;
        match db.get(tables::USER, None, Key::Name(USER_KEY)) {
            Ok(_) => return Err(CoreError::UserExists),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let user = Self {
            version: RECORD_VERSION,
            name,
            identity: Identity::generate().to_export(),
            creation_time: Utc::now(),
        };
        db.put_json(tables::USER, None, Key::Name(USER_KEY), &user)?;
        info!(name = %user.name, "user created");
        Ok(user)
    }

    pub fn load(db: &Database) -> Result<Self> {
        match db.get_json(tables::USER, None, Key::Name(USER_KEY)) {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound) => Err(CoreError::NoUser),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(db: &Database) -> Result<bool> {
        match db.get(tables::USER, None, Key::Name(USER_KEY)) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn identity(&self) -> Result<Identity> {
        Ok(Identity::from_export(&self.identity)?)
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("name", &self.name)
            .field("creation_time", &self.creation_time)
            .finish_non_exhaustive()
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 || len > NAME_MAX_LEN {
        return Err(CoreError::InvalidName(format!(
            "must be 1 to {NAME_MAX_LEN} characters, got {len}"
        )));
    }
    Ok(name.to_string())
}

/// Remember the address the onion service publishes us under.
pub fn save_own_address(db: &Database, address: &PeerAddress) -> Result<()> {
    db.put_json(tables::USER, None, Key::Name(ADDRESS_KEY), address)?;
    Ok(())
}

pub fn load_own_address(db: &Database) -> Result<Option<PeerAddress>> {
    match db.get_json(tables::USER, None, Key::Name(ADDRESS_KEY)) {
        Ok(address) => Ok(Some(address)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("user.db")).unwrap();
        db.set_pass("pw").unwrap();
        (dir, db)
    }

    #[test]
    fn create_then_load() {
        let (_dir, db) = open();
        assert!(!User::exists(&db).unwrap());
        assert!(matches!(User::load(&db), Err(CoreError::NoUser)));

        let created = User::create(&db, "  alice ").unwrap();
        assert_eq!(created.name, "alice");
        assert!(User::exists(&db).unwrap());

        let loaded = User::load(&db).unwrap();
        assert_eq!(loaded.name, "alice");
        assert_eq!(
            loaded.identity().unwrap().public_key(),
            created.identity().unwrap().public_key()
        );
    }

    #[test]
    fn create_only_once() {
        let (_dir, db) = open();
        User::create(&db, "alice").unwrap();
        assert!(matches!(User::create(&db, "bob"), Err(CoreError::UserExists)));
    }

    #[test]
    fn name_bounds() {
        let (_dir, db) = open();
        assert!(matches!(User::create(&db, ""), Err(CoreError::InvalidName(_))));
        assert!(matches!(
            User::create(&db, &"x".repeat(NAME_MAX_LEN + 1)),
            Err(CoreError::InvalidName(_))
        ));
        assert!(User::create(&db, &"é".repeat(NAME_MAX_LEN)).is_ok());
    }

    #[test]
    fn own_address_roundtrip() {
        let (_dir, db) = open();
        assert!(load_own_address(&db).unwrap().is_none());
        let addr = PeerAddress::parse("me.onion").unwrap();
        save_own_address(&db, &addr).unwrap();
        assert_eq!(load_own_address(&db).unwrap(), Some(addr));
    }
}
