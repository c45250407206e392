use std::collections::BTreeMap;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, ToSql, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;

use murmur_shared::crypto::{self, SymmetricKey};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Address of a value inside a (table, sub-table) pair.
///
/// Sequence-allocated records use numeric ids; the `user` table uses names.
/// Only numeric keys take part in listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    Id(u64),
    Name(&'a str),
}

impl ToSql for Key<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Key::Id(id) => ToSqlOutput::Owned(Value::Integer(to_sql_int(*id))),
            Key::Name(name) => ToSqlOutput::Borrowed(ValueRef::Text(name.as_bytes())),
        })
    }
}

impl From<u64> for Key<'_> {
    fn from(id: u64) -> Self {
        Key::Id(id)
    }
}

impl<'a> From<&'a str> for Key<'a> {
    fn from(name: &'a str) -> Self {
        Key::Name(name)
    }
}

/// Entries of one table, keyed by numeric id in ascending order.
pub type Entries = BTreeMap<u64, Vec<u8>>;

impl Database {
    // ------------------------------------------------------------------
    // Tables and sequences
    // ------------------------------------------------------------------

    /// Create `(table, sub)` if it does not exist yet.
    pub fn create_table(&self, table: &str, sub: Option<u64>) -> Result<()> {
        ensure_table(&self.conn(), table, sub)
    }

    /// Remove every entry of `(table, sub)`. The id sequence is kept, so ids
    /// handed out before the clear are never reused.
    pub fn clear_table(&self, table: &str, sub: Option<u64>) -> Result<()> {
        let conn = self.conn();
        ensure_table(&conn, table, sub)?;
        let removed = conn.execute(
            "DELETE FROM entries WHERE tbl = ?1 AND sub = ?2",
            params![table, sub_id(sub)],
        )?;
        tracing::debug!(table, sub = sub_id(sub), removed, "table cleared");
        Ok(())
    }

    /// Allocate the next id of `(table, sub)`. Ids start at 1 and strictly
    /// increase.
    pub fn next_id(&self, table: &str, sub: Option<u64>) -> Result<u64> {
        let id: i64 = self
            .conn()
            .query_row(
                "UPDATE sequences SET next_id = next_id + 1
                 WHERE tbl = ?1 AND sub = ?2
                 RETURNING next_id - 1",
                params![table, sub_id(sub)],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| no_such_table(table, sub))?;
        Ok(from_sql_int(id))
    }

    // ------------------------------------------------------------------
    // Single values
    // ------------------------------------------------------------------

    /// Encrypt `value` and store it, replacing any previous value.
    pub fn put(&self, table: &str, sub: Option<u64>, key: Key<'_>, value: &[u8]) -> Result<()> {
        let cipher = self.key()?;
        write_value(&self.conn(), &cipher, table, sub, key, value)
    }

    /// Fetch and decrypt one value.
    pub fn get(&self, table: &str, sub: Option<u64>, key: Key<'_>) -> Result<Vec<u8>> {
        let cipher = self.key()?;
        let stored = read_raw(&self.conn(), table, sub, key)?;
        Ok(crypto::decrypt(&cipher, &stored)?)
    }

    /// Stored ciphertext, readable without the key.
    pub(crate) fn get_raw(&self, table: &str, sub: Option<u64>, key: Key<'_>) -> Result<Vec<u8>> {
        read_raw(&self.conn(), table, sub, key)
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    /// All numerically keyed entries, ascending.
    pub fn list(&self, table: &str, sub: Option<u64>) -> Result<Entries> {
        self.list_from(table, sub, 0)
    }

    /// Entries with id `>= start`, ascending.
    pub fn list_from(&self, table: &str, sub: Option<u64>, start: u64) -> Result<Entries> {
        let cipher = self.key()?;
        let conn = self.conn();
        require_table(&conn, table, sub)?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM entries
             WHERE tbl = ?1 AND sub = ?2 AND typeof(key) = 'integer' AND key >= ?3
             ORDER BY key ASC",
        )?;
        let rows = stmt.query_map(params![table, sub_id(sub), to_sql_int(start)], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        decrypt_rows(&cipher, rows)
    }

    /// The `count` highest-numbered entries and the id listing started from.
    ///
    /// Fails with [`StoreError::EmptyTable`] when the table holds no
    /// numerically keyed entries.
    pub fn list_last(&self, table: &str, sub: Option<u64>, count: usize) -> Result<(Entries, u64)> {
        let max = self.max_id(table, sub)?;
        if count == 0 {
            return Ok((Entries::new(), max + 1));
        }

        let cipher = self.key()?;
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key, value FROM entries
             WHERE tbl = ?1 AND sub = ?2 AND typeof(key) = 'integer'
             ORDER BY key DESC
             LIMIT ?3",
        )?;
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![table, sub_id(sub), limit], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let entries = decrypt_rows(&cipher, rows)?;
        let start = entries.keys().next().copied().unwrap_or(max);
        Ok((entries, start))
    }

    /// Highest numeric key present in `(table, sub)`.
    pub fn max_id(&self, table: &str, sub: Option<u64>) -> Result<u64> {
        let conn = self.conn();
        require_table(&conn, table, sub)?;
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(key) FROM entries
             WHERE tbl = ?1 AND sub = ?2 AND typeof(key) = 'integer'",
            params![table, sub_id(sub)],
            |row| row.get(0),
        )?;
        max.map(from_sql_int).ok_or(StoreError::EmptyTable)
    }

    // ------------------------------------------------------------------
    // JSON records
    // ------------------------------------------------------------------

    pub fn put_json<T: Serialize>(
        &self,
        table: &str,
        sub: Option<u64>,
        key: Key<'_>,
        value: &T,
    ) -> Result<()> {
        self.put(table, sub, key, &serde_json::to_vec(value)?)
    }

    pub fn get_json<T: DeserializeOwned>(
        &self,
        table: &str,
        sub: Option<u64>,
        key: Key<'_>,
    ) -> Result<T> {
        decode(&self.get(table, sub, key)?)
    }

    pub fn list_json<T: DeserializeOwned>(
        &self,
        table: &str,
        sub: Option<u64>,
    ) -> Result<BTreeMap<u64, T>> {
        decode_all(self.list(table, sub)?)
    }

    pub fn list_from_json<T: DeserializeOwned>(
        &self,
        table: &str,
        sub: Option<u64>,
        start: u64,
    ) -> Result<BTreeMap<u64, T>> {
        decode_all(self.list_from(table, sub, start)?)
    }

    pub fn list_last_json<T: DeserializeOwned>(
        &self,
        table: &str,
        sub: Option<u64>,
        count: usize,
    ) -> Result<(BTreeMap<u64, T>, u64)> {
        let (entries, start) = self.list_last(table, sub, count)?;
        Ok((decode_all(entries)?, start))
    }

    /// Read, modify and write back one JSON record inside a single immediate
    /// transaction.
    ///
    /// No other writer can touch the store between the read and the write,
    /// so concurrent updates to the same record are serialized rather than
    /// lost. If `f` fails nothing is written and its error is returned.
    pub fn update<T, R, E, F>(&self, table: &str, sub: Option<u64>, key: Key<'_>, f: F) -> std::result::Result<R, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StoreError>,
        F: FnOnce(&mut T) -> std::result::Result<R, E>,
    {
        let cipher = self.key()?;
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        let stored = read_raw(&tx, table, sub, key)?;
        let mut record: T = decode(&crypto::decrypt(&cipher, &stored).map_err(StoreError::from)?)?;

        let out = f(&mut record)?;

        let encoded = serde_json::to_vec(&record).map_err(StoreError::from)?;
        write_value(&tx, &cipher, table, sub, key, &encoded)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }
}

// ----------------------------------------------------------------------
// Helpers shared by plain calls and transactions
// ----------------------------------------------------------------------

fn sub_id(sub: Option<u64>) -> i64 {
    sub.map_or(0, to_sql_int)
}

fn to_sql_int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_sql_int(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn no_such_table(table: &str, sub: Option<u64>) -> StoreError {
    match sub {
        Some(sub) => StoreError::NoSuchTable(format!("{table}/{sub}")),
        None => StoreError::NoSuchTable(table.to_string()),
    }
}

fn ensure_table(conn: &Connection, table: &str, sub: Option<u64>) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO sequences (tbl, sub) VALUES (?1, ?2)",
        params![table, sub_id(sub)],
    )?;
    Ok(())
}

fn require_table(conn: &Connection, table: &str, sub: Option<u64>) -> Result<()> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sequences WHERE tbl = ?1 AND sub = ?2",
            params![table, sub_id(sub)],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(no_such_table(table, sub))
    }
}

fn read_raw(conn: &Connection, table: &str, sub: Option<u64>, key: Key<'_>) -> Result<Vec<u8>> {
    conn.query_row(
        "SELECT value FROM entries WHERE tbl = ?1 AND sub = ?2 AND key = ?3",
        params![table, sub_id(sub), key],
        |row| row.get(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    })
}

fn write_value(
    conn: &Connection,
    cipher: &SymmetricKey,
    table: &str,
    sub: Option<u64>,
    key: Key<'_>,
    value: &[u8],
) -> Result<()> {
    ensure_table(conn, table, sub)?;
    let encrypted = crypto::encrypt(cipher, value)?;
    conn.execute(
        "INSERT OR REPLACE INTO entries (tbl, sub, key, value) VALUES (?1, ?2, ?3, ?4)",
        params![table, sub_id(sub), key, encrypted],
    )?;

    // Explicitly keyed writes must not be handed out again by the sequence.
    if let Key::Id(id) = key {
        conn.execute(
            "UPDATE sequences SET next_id = MAX(next_id, ?3 + 1) WHERE tbl = ?1 AND sub = ?2",
            params![table, sub_id(sub), to_sql_int(id)],
        )?;
    }
    Ok(())
}

fn decrypt_rows<I>(cipher: &SymmetricKey, rows: I) -> Result<Entries>
where
    I: Iterator<Item = rusqlite::Result<(i64, Vec<u8>)>>,
{
    let mut entries = Entries::new();
    for row in rows {
        let (key, value) = row?;
        entries.insert(from_sql_int(key), crypto::decrypt(cipher, &value)?);
    }
    Ok(entries)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode_all<T: DeserializeOwned>(entries: Entries) -> Result<BTreeMap<u64, T>> {
    entries
        .into_iter()
        .map(|(id, bytes)| Ok((id, decode(&bytes)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::tables;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        db.set_pass("password").unwrap();
        (dir, db)
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Counter {
        n: u32,
    }

    #[test]
    fn put_get_roundtrip_and_overwrite() {
        let (_dir, db) = open();
        db.put(tables::CONTACTS, None, Key::Id(3), b"first").unwrap();
        db.put(tables::CONTACTS, None, Key::Id(3), b"second").unwrap();
        assert_eq!(db.get(tables::CONTACTS, None, Key::Id(3)).unwrap(), b"second");
        assert!(matches!(
            db.get(tables::CONTACTS, None, Key::Id(4)),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn named_and_numeric_keys_do_not_collide() {
        let (_dir, db) = open();
        db.put(tables::USER, None, Key::Name("1"), b"named").unwrap();
        db.put(tables::USER, None, Key::Id(1), b"numbered").unwrap();
        assert_eq!(db.get(tables::USER, None, Key::Name("1")).unwrap(), b"named");
        assert_eq!(db.get(tables::USER, None, Key::Id(1)).unwrap(), b"numbered");

        // Names (including the canary) never appear in listings.
        let listed = db.list(tables::USER, None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[&1], b"numbered");
    }

    #[test]
    fn values_are_encrypted_at_rest() {
        let (_dir, db) = open();
        db.put(tables::CONTACTS, None, Key::Id(1), b"plain text value").unwrap();
        let raw = db.get_raw(tables::CONTACTS, None, Key::Id(1)).unwrap();
        assert_eq!(raw.len() % 16, 0);
        assert!(!raw.windows(5).any(|w| w == b"plain"));
    }

    #[test]
    fn next_id_is_strictly_increasing_per_table() {
        let (_dir, db) = open();
        assert_eq!(db.next_id(tables::CONTACTS, None).unwrap(), 1);
        assert_eq!(db.next_id(tables::CONTACTS, None).unwrap(), 2);
        db.create_table(tables::MESSAGES, Some(7)).unwrap();
        assert_eq!(db.next_id(tables::MESSAGES, Some(7)).unwrap(), 1);
        assert_eq!(db.next_id(tables::CONTACTS, None).unwrap(), 3);
        assert!(matches!(
            db.next_id(tables::MESSAGES, Some(8)),
            Err(StoreError::NoSuchTable(_))
        ));
    }

    #[test]
    fn explicit_ids_advance_the_sequence() {
        let (_dir, db) = open();
        db.put(tables::CONTACTS, None, Key::Id(10), b"x").unwrap();
        assert_eq!(db.next_id(tables::CONTACTS, None).unwrap(), 11);
    }

    #[test]
    fn clear_table_keeps_sequence() {
        let (_dir, db) = open();
        db.create_table(tables::MESSAGES, Some(1)).unwrap();
        for _ in 0..3 {
            let id = db.next_id(tables::MESSAGES, Some(1)).unwrap();
            db.put(tables::MESSAGES, Some(1), Key::Id(id), b"m").unwrap();
        }
        db.clear_table(tables::MESSAGES, Some(1)).unwrap();
        assert!(db.list(tables::MESSAGES, Some(1)).unwrap().is_empty());
        assert_eq!(db.next_id(tables::MESSAGES, Some(1)).unwrap(), 4);
    }

    #[test]
    fn sub_tables_are_isolated() {
        let (_dir, db) = open();
        db.put(tables::MESSAGES, Some(1), Key::Id(1), b"a").unwrap();
        db.put(tables::MESSAGES, Some(2), Key::Id(1), b"b").unwrap();
        db.clear_table(tables::MESSAGES, Some(1)).unwrap();
        assert_eq!(db.get(tables::MESSAGES, Some(2), Key::Id(1)).unwrap(), b"b");
    }

    #[test]
    fn listing_orders_and_bounds() {
        let (_dir, db) = open();
        for id in [5u64, 1, 3, 2, 4] {
            db.put(tables::CONTACTS, None, Key::Id(id), &[id as u8]).unwrap();
        }

        let all: Vec<u64> = db.list(tables::CONTACTS, None).unwrap().into_keys().collect();
        assert_eq!(all, vec![1, 2, 3, 4, 5]);

        let from: Vec<u64> = db.list_from(tables::CONTACTS, None, 3).unwrap().into_keys().collect();
        assert_eq!(from, vec![3, 4, 5]);

        let (last, start) = db.list_last(tables::CONTACTS, None, 2).unwrap();
        assert_eq!(last.into_keys().collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(start, 4);

        let (all_last, start) = db.list_last(tables::CONTACTS, None, 50).unwrap();
        assert_eq!(all_last.len(), 5);
        assert_eq!(start, 1);

        assert_eq!(db.max_id(tables::CONTACTS, None).unwrap(), 5);
    }

    #[test]
    fn empty_and_missing_tables() {
        let (_dir, db) = open();
        assert!(matches!(
            db.list_last(tables::CONTACTS, None, 3),
            Err(StoreError::EmptyTable)
        ));
        assert!(matches!(db.max_id(tables::CONTACTS, None), Err(StoreError::EmptyTable)));
        assert!(matches!(
            db.list(tables::MESSAGES, Some(99)),
            Err(StoreError::NoSuchTable(_))
        ));
    }

    #[test]
    fn wrong_password_reads_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        db.set_pass("one").unwrap();
        db.put(tables::CONTACTS, None, Key::Id(1), b"secret").unwrap();
        // Re-keying without verification leaves old values unreadable.
        db.set_pass("two").unwrap();
        match db.get(tables::CONTACTS, None, Key::Id(1)) {
            Ok(bytes) => assert_ne!(bytes, b"secret"),
            Err(e) => assert!(e.is_corruption()),
        }
    }

    #[test]
    fn json_helpers_and_update() {
        let (_dir, db) = open();
        db.put_json(tables::CONTACTS, None, Key::Id(1), &Counter { n: 1 }).unwrap();

        let seen: u32 = db
            .update(tables::CONTACTS, None, Key::Id(1), |c: &mut Counter| {
                c.n += 1;
                Ok::<_, StoreError>(c.n)
            })
            .unwrap();
        assert_eq!(seen, 2);

        let stored: Counter = db.get_json(tables::CONTACTS, None, Key::Id(1)).unwrap();
        assert_eq!(stored, Counter { n: 2 });

        let all: BTreeMap<u64, Counter> = db.list_json(tables::CONTACTS, None).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn failed_update_writes_nothing() {
        let (_dir, db) = open();
        db.put_json(tables::CONTACTS, None, Key::Id(1), &Counter { n: 1 }).unwrap();

        let result: std::result::Result<(), StoreError> =
            db.update(tables::CONTACTS, None, Key::Id(1), |c: &mut Counter| {
                c.n = 100;
                Err(StoreError::EmptyTable)
            });
        assert!(result.is_err());

        let stored: Counter = db.get_json(tables::CONTACTS, None, Key::Id(1)).unwrap();
        assert_eq!(stored.n, 1);
    }

    #[test]
    fn update_missing_record_is_not_found() {
        let (_dir, db) = open();
        let result = db.update(tables::CONTACTS, None, Key::Id(9), |c: &mut Counter| {
            c.n += 1;
            Ok::<_, StoreError>(())
        });
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[test]
    fn concurrent_updates_are_serialized() {
        use std::sync::Arc;

        let (_dir, db) = open();
        let db = Arc::new(db);
        db.put_json(tables::CONTACTS, None, Key::Id(1), &Counter { n: 0 }).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        db.update(tables::CONTACTS, None, Key::Id(1), |c: &mut Counter| {
                            c.n += 1;
                            Ok::<_, StoreError>(())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stored: Counter = db.get_json(tables::CONTACTS, None, Key::Id(1)).unwrap();
        assert_eq!(stored.n, 200);
    }
}
