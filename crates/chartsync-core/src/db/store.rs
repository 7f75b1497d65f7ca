//! Persisted store abstraction
//!
//! The engine keeps all durable state in five named collections of JSON
//! values. Every multi-record mutation is written through one [`WriteBatch`]
//! so a crash never leaves half an operation behind.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Named collection inside the persisted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    /// Sync queue items keyed by item id
    Queue,
    /// Version lineage keyed by `Type/id`
    Versions,
    /// Conflicts keyed by conflict id
    Conflicts,
    /// Local resource snapshots keyed by `Type/id`
    ResourceCache,
    /// Free-form key/value metadata (checkpoints, counters, error log)
    Metadata,
}

impl Collection {
    pub const ALL: [Self; 5] = [
        Self::Queue,
        Self::Versions,
        Self::Conflicts,
        Self::ResourceCache,
        Self::Metadata,
    ];

    /// Table/collection name used by the backing store.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Versions => "versions",
            Self::Conflicts => "conflicts",
            Self::ResourceCache => "resource_cache",
            Self::Metadata => "metadata",
        }
    }
}

/// One write inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        collection: Collection,
        key: String,
        value: String,
    },
    Delete {
        collection: Collection,
        key: String,
    },
}

/// Ordered set of writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `value` as JSON and stage a put.
    pub fn put<T: Serialize + ?Sized>(
        &mut self,
        collection: Collection,
        key: impl Into<String>,
        value: &T,
    ) -> Result<()> {
        let value = serde_json::to_string(value)?;
        self.ops.push(WriteOp::Put {
            collection,
            key: key.into(),
            value,
        });
        Ok(())
    }

    pub fn delete(&mut self, collection: Collection, key: impl Into<String>) {
        self.ops.push(WriteOp::Delete {
            collection,
            key: key.into(),
        });
    }

    pub fn append(&mut self, other: Self) {
        self.ops.extend(other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Transactional key/value store with named collections.
pub trait Store: Send + Sync {
    /// Raw JSON value stored under `key`.
    fn get(&self, collection: Collection, key: &str) -> Result<Option<String>>;

    /// Every `(key, value)` pair of a collection, ordered by key.
    fn scan(&self, collection: Collection) -> Result<Vec<(String, String)>>;

    /// Apply all writes of `batch` atomically.
    fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Remove every entry of a collection.
    fn clear(&self, collection: Collection) -> Result<()>;

    fn put<T: Serialize>(&self, collection: Collection, key: &str, value: &T) -> Result<()>
    where
        Self: Sized,
    {
        let mut batch = WriteBatch::new();
        batch.put(collection, key, value)?;
        self.commit(batch)
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(collection, key);
        self.commit(batch)
    }
}

/// Typed JSON helpers over any [`Store`].
pub trait StoreExt {
    fn get_json<T: DeserializeOwned>(&self, collection: Collection, key: &str)
        -> Result<Option<T>>;

    fn scan_json<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>>;
}

impl<S: Store + ?Sized> StoreExt for S {
    fn get_json<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<T>> {
        self.get(collection, key)?
            .map(|raw| serde_json::from_str(&raw).map_err(Into::into))
            .transpose()
    }

    fn scan_json<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>> {
        self.scan(collection)?
            .into_iter()
            .map(|(_, raw)| serde_json::from_str(&raw).map_err(Into::into))
            .collect()
    }
}
