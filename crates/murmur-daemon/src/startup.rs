//! Opening the store and the identity before the node starts.

use thiserror::Error;
use tracing::info;

use murmur_core::{CoreError, User};
use murmur_store::{Database, StoreError};

use crate::config::DaemonConfig;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("MURMUR_PASSWORD is not set")]
    MissingPassword,

    #[error("wrong password for {0}")]
    WrongPassword(String),

    #[error("no identity in the store yet; set MURMUR_USER_NAME to create one")]
    MissingUserName,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub fn open_database(config: &DaemonConfig) -> Result<Database, StartupError> {
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    unlock(&db, config)?;
    Ok(db)
}

/// Verify the password against an existing store, or set it on a new one.
pub fn unlock(db: &Database, config: &DaemonConfig) -> Result<(), StartupError> {
    let password = config.password.as_deref().ok_or(StartupError::MissingPassword)?;

    if db.is_initialized() {
        if !db.verify_pass(password) {
            let location = db
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "the store".into());
            return Err(StartupError::WrongPassword(location));
        }
        info!("store unlocked");
    } else {
        db.set_pass(password)?;
        info!("new store initialised");
    }
    Ok(())
}

/// Load the identity, creating it from `MURMUR_USER_NAME` on first run.
pub fn ensure_user(db: &Database, config: &DaemonConfig) -> Result<User, StartupError> {
    if User::exists(db)? {
        return Ok(User::load(db)?);
    }
    let name = config.user_name.as_deref().ok_or(StartupError::MissingUserName)?;
    let user = User::create(db, name)?;
    info!(name = %user.name, "identity created");
    Ok(user)
}
