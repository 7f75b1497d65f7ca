//! SQLite-backed persisted store

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use super::migrations;
use super::store::{Collection, Store, WriteBatch, WriteOp};
use crate::error::{Error, Result};

/// Durable [`Store`] with one key/value table per collection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open a store at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        migrations::get_version(&conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("sqlite connection lock poisoned".to_string()))
    }
}

/// Configure `SQLite` for a single-writer local store
fn configure(conn: &Connection) -> Result<()> {
    // In-memory databases report "memory" instead of switching to WAL
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", 10_000)?;
    Ok(())
}

impl Store for SqliteStore {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let sql = format!("SELECT value FROM {} WHERE key = ?1", collection.name());
        let value = conn
            .query_row(&sql, params![key], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(value)
    }

    fn scan(&self, collection: Collection) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let sql = format!("SELECT key, value FROM {} ORDER BY key", collection.name());
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for op in batch.into_ops() {
            match op {
                WriteOp::Put {
                    collection,
                    key,
                    value,
                } => {
                    let sql = format!(
                        "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
                        collection.name()
                    );
                    tx.execute(&sql, params![key, value])?;
                }
                WriteOp::Delete { collection, key } => {
                    let sql = format!("DELETE FROM {} WHERE key = ?1", collection.name());
                    tx.execute(&sql, params![key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn clear(&self, collection: Collection) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(&format!("DELETE FROM {}", collection.name()), [])?;
        Ok(())
    }
}
