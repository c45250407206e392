//! v001 -- Initial schema creation.
//!
//! The store is a generic encrypted key/value engine, so the schema only has
//! two tables: one row per (table, sub-table) pair holding its sequence
//! counter, and one row per stored value.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Logical tables and their id sequences
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sequences (
    tbl     TEXT    NOT NULL,
    sub     INTEGER NOT NULL,               -- 0 = top-level table
    next_id INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (tbl, sub)
);

-- ----------------------------------------------------------------
-- Encrypted values
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS entries (
    tbl   TEXT    NOT NULL,
    sub   INTEGER NOT NULL,
    key   BLOB    NOT NULL,                 -- INTEGER for sequence ids, TEXT for named keys
    value BLOB    NOT NULL,                 -- padded AES-256 ciphertext of a JSON record
    PRIMARY KEY (tbl, sub, key),
    FOREIGN KEY (tbl, sub) REFERENCES sequences(tbl, sub) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
