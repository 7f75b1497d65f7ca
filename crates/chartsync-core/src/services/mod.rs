//! Service layer
//!
//! [`SyncEngine`] is the constructed service object that callers (UI,
//! background workers, the CLI) talk to. Every dependency is passed in.

mod engine;

pub use engine::{CleanupReport, SyncEngine, SyncEngineBuilder, DEFAULT_RESOLVER};
