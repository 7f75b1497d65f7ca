//! Persisted store layer for chartsync

mod memory;
mod migrations;
mod sqlite;
mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{Collection, Store, StoreExt, WriteBatch, WriteOp};
