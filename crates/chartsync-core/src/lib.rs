//! chartsync-core - Core library for chartsync
//!
//! This crate contains the offline queue, version tracking, conflict
//! resolution and sync orchestration used by every chartsync client. Local
//! changes are persisted first and pushed to the canonical server whenever
//! connectivity allows.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use clock::{Clock, IdGenerator, ManualClock, SequentialIds, SystemClock, UuidGenerator};
pub use config::SyncConfig;
pub use db::{MemoryStore, SqliteStore, Store};
pub use error::{Error, Result};
pub use export::SyncDataExport;
pub use models::{
    ConflictStrategy, Operation, Priority, Resolution, Resource, ResourceKey, SyncConflict,
    SyncQueueItem, SyncStatus,
};
pub use remote::{DisconnectedRemote, InMemoryRemote, RemoteApi, RemoteError};
pub use services::{CleanupReport, SyncEngine, SyncEngineBuilder};
pub use state::SyncState;
pub use sync::{EnqueueOptions, SyncDirection, SyncEvent, SyncEventKind, SyncOptions, SyncReport};
