//! In-memory store used by tests and ephemeral sessions

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::store::{Collection, Store, WriteBatch, WriteOp};
use crate::error::{Error, Result};

type Tables = BTreeMap<Collection, BTreeMap<String, String>>;

/// `BTreeMap`-backed [`Store`]. A batch is applied to a copy and swapped in,
/// so a failing commit leaves the previous state intact.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backing store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.lock()
            .ok()
            .and_then(|tables| tables.get(&collection).map(BTreeMap::len))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable(
                "in-memory store is offline".to_string(),
            ));
        }
        self.tables
            .lock()
            .map_err(|_| Error::Database("memory store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<String>> {
        let tables = self.lock()?;
        Ok(tables
            .get(&collection)
            .and_then(|table| table.get(key))
            .cloned())
    }

    fn scan(&self, collection: Collection) -> Result<Vec<(String, String)>> {
        let tables = self.lock()?;
        Ok(tables
            .get(&collection)
            .map(|table| {
                table
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut tables = self.lock()?;
        let mut next = tables.clone();
        for op in batch.into_ops() {
            match op {
                WriteOp::Put {
                    collection,
                    key,
                    value,
                } => {
                    next.entry(collection).or_default().insert(key, value);
                }
                WriteOp::Delete { collection, key } => {
                    if let Some(table) = next.get_mut(&collection) {
                        table.remove(&key);
                    }
                }
            }
        }
        *tables = next;
        Ok(())
    }

    fn clear(&self, collection: Collection) -> Result<()> {
        let mut tables = self.lock()?;
        tables.remove(&collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreExt;

    #[test]
    fn put_get_scan_delete() {
        let store = MemoryStore::new();
        store.put(Collection::Metadata, "b", &2_u32).unwrap();
        store.put(Collection::Metadata, "a", &1_u32).unwrap();

        assert_eq!(
            store.get_json::<u32>(Collection::Metadata, "a").unwrap(),
            Some(1)
        );
        let keys: Vec<String> = store
            .scan(Collection::Metadata)
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        store.delete(Collection::Metadata, "a").unwrap();
        assert_eq!(store.get(Collection::Metadata, "a").unwrap(), None);
        assert_eq!(store.len(Collection::Metadata), 1);
    }

    #[test]
    fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        let error = store.get(Collection::Queue, "x").unwrap_err();
        assert!(error.is_store_failure());
        assert!(store.commit(WriteBatch::new()).is_err());

        store.set_available(true);
        assert!(store.get(Collection::Queue, "x").unwrap().is_none());
    }

    #[test]
    fn clear_only_touches_one_collection() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Collection::Queue, "q1", &"item").unwrap();
        batch.put(Collection::Versions, "Patient/p1", &1).unwrap();
        store.commit(batch).unwrap();

        store.clear(Collection::Queue).unwrap();
        assert_eq!(store.len(Collection::Queue), 0);
        assert_eq!(store.len(Collection::Versions), 1);
    }
}
