//! # murmur-store
//!
//! Local encrypted storage for murmur, backed by SQLite.
//!
//! The store is a table / sub-table key-value engine. Every value is
//! encrypted with a key derived from the user's password before it reaches
//! disk, so the database file alone reveals only table names, key ids and
//! value sizes. The crate exposes a synchronous [`Database`] handle that
//! wraps a `rusqlite::Connection`.

pub mod database;
pub mod entries;
pub mod migrations;

mod error;

pub use database::Database;
pub use entries::{Entries, Key};
pub use error::{Result, StoreError};

/// Names of the logical tables created on open.
pub mod tables {
    /// Own identity, address and the password canary (named keys).
    pub const USER: &str = "user";
    /// One record per contact, keyed by contact id.
    pub const CONTACTS: &str = "contacts";
    /// One sub-table per contact, keyed by message id.
    pub const MESSAGES: &str = "messages";
}
