#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chartsync_core::remote::{RemoteResult, SearchParams};
use chartsync_core::{
    Clock, InMemoryRemote, ManualClock, MemoryStore, RemoteApi, Resource, SequentialIds, Store,
    SyncConfig, SyncEngine,
};
use chrono::{DateTime, Utc};
use serde_json::json;

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-06-01T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn config() -> SyncConfig {
    SyncConfig {
        tracked_resource_types: vec!["Observation".to_string()],
        ..SyncConfig::default()
    }
}

pub struct Harness {
    pub engine: SyncEngine,
    pub remote: Arc<InMemoryRemote>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(online: bool) -> Self {
        Self::with_config(online, config())
    }

    pub fn with_config(online: bool, config: SyncConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let remote = Arc::new(InMemoryRemote::with_clock(clock.clone()));
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), remote.clone(), clock.clone(), online, config);
        Self {
            engine,
            remote,
            store,
            clock,
        }
    }

    /// Put a server-side copy in place, stamped with the current clock.
    pub fn seed_remote(&self, resource: Resource, version: u64) -> Resource {
        let resource = resource
            .with_version(version)
            .with_last_updated(self.clock_now());
        self.remote.seed(resource.clone());
        resource
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

pub fn engine_with(
    store: Arc<dyn Store>,
    remote: Arc<dyn RemoteApi>,
    clock: Arc<ManualClock>,
    online: bool,
    config: SyncConfig,
) -> SyncEngine {
    SyncEngine::builder(store, remote)
        .config(config)
        .clock(clock)
        .id_generator(Arc::new(SequentialIds::new("id")))
        .online(online)
        .build()
        .unwrap()
}

pub fn observation(id: &str, value: i64) -> Resource {
    Resource::new("Observation", id)
        .with_field("status", json!("final"))
        .with_field("valueInteger", json!(value))
}

/// Remote wrapper that yields to the scheduler before every call, so
/// concurrent callers actually interleave.
pub struct YieldingRemote(pub Arc<InMemoryRemote>);

#[async_trait]
impl RemoteApi for YieldingRemote {
    async fn create(&self, resource: &Resource) -> RemoteResult<Resource> {
        tokio::task::yield_now().await;
        self.0.create(resource).await
    }

    async fn read(&self, resource_type: &str, id: &str) -> RemoteResult<Resource> {
        tokio::task::yield_now().await;
        self.0.read(resource_type, id).await
    }

    async fn update(&self, resource: &Resource) -> RemoteResult<Resource> {
        tokio::task::yield_now().await;
        self.0.update(resource).await
    }

    async fn delete(&self, resource_type: &str, id: &str) -> RemoteResult<()> {
        tokio::task::yield_now().await;
        self.0.delete(resource_type, id).await
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> RemoteResult<Vec<Resource>> {
        tokio::task::yield_now().await;
        self.0.search(resource_type, params).await
    }
}
