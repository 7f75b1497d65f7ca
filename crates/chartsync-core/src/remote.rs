//! Remote resource API collaborator
//!
//! The engine talks to the canonical server only through [`RemoteApi`].
//! [`InMemoryRemote`] is a complete in-process server used by tests and demos;
//! [`DisconnectedRemote`] backs tools that must never reach the network.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::models::{Resource, ResourceKey};

/// Failure reported by the remote collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote resource {resource_type}/{id} not found")]
    NotFound { resource_type: String, id: String },

    #[error("Remote version conflict: {0}")]
    Conflict(String),

    #[error("Remote rejected payload: {0}")]
    Invalid(String),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Remote call timed out")]
    Timeout,

    #[error("Remote server error: {0}")]
    Server(String),
}

impl RemoteError {
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Whether a later attempt may succeed. Rejected payloads never will.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Invalid(_) | Self::NotFound { .. })
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Query parameters for [`RemoteApi::search`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    /// Only resources modified strictly after this instant
    pub modified_since: Option<DateTime<Utc>>,
    /// Extra server-specific parameters
    pub params: Vec<(String, String)>,
}

impl SearchParams {
    pub const fn modified_since(since: Option<DateTime<Utc>>) -> Self {
        Self {
            modified_since: since,
            params: Vec::new(),
        }
    }
}

/// CRUD + search over structured clinical resources.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create a resource; the server assigns id, version and timestamp.
    async fn create(&self, resource: &Resource) -> RemoteResult<Resource>;

    async fn read(&self, resource_type: &str, id: &str) -> RemoteResult<Resource>;

    /// Replace a resource; the server bumps its version.
    async fn update(&self, resource: &Resource) -> RemoteResult<Resource>;

    async fn delete(&self, resource_type: &str, id: &str) -> RemoteResult<()>;

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> RemoteResult<Vec<Resource>>;
}

/// Remote operation names, used for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RemoteOp {
    Create,
    Read,
    Update,
    Delete,
    Search,
}

#[derive(Debug, Default)]
struct ServerState {
    resources: BTreeMap<ResourceKey, Resource>,
    calls: HashMap<RemoteOp, usize>,
    scripted_failures: HashMap<RemoteOp, VecDeque<RemoteError>>,
    fail_all: Option<RemoteError>,
}

/// In-process server with failure injection and call counters.
pub struct InMemoryRemote {
    state: Mutex<ServerState>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InMemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRemote").finish_non_exhaustive()
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(ServerState::default()),
            next_id: AtomicU64::new(0),
            clock,
        }
    }

    /// Store a resource exactly as given, bypassing versioning.
    pub fn seed(&self, resource: Resource) {
        let mut state = self.lock();
        state.resources.insert(resource.key(), resource);
    }

    /// Simulate an edit made by another client: apply `edit`, bump the
    /// version and stamp `at`.
    pub fn edit_remotely(
        &self,
        resource_type: &str,
        id: &str,
        at: DateTime<Utc>,
        edit: impl FnOnce(&mut Resource),
    ) -> RemoteResult<Resource> {
        let mut state = self.lock();
        let key = ResourceKey::new(resource_type, id);
        let resource = state
            .resources
            .get_mut(&key)
            .ok_or_else(|| RemoteError::not_found(resource_type, id))?;
        edit(resource);
        resource.meta.version_id = Some(resource.meta.version_id.unwrap_or(0) + 1);
        resource.meta.last_updated = Some(at);
        Ok(resource.clone())
    }

    pub fn get(&self, resource_type: &str, id: &str) -> Option<Resource> {
        self.lock()
            .resources
            .get(&ResourceKey::new(resource_type, id))
            .cloned()
    }

    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn calls(&self, op: RemoteOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Queue one failure for the next call of `op`. Failures queue up.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.lock()
            .scripted_failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fail the next `times` calls of `op` with the same error.
    pub fn fail_times(&self, op: RemoteOp, times: usize, error: &RemoteError) {
        for _ in 0..times {
            self.fail_next(op, error.clone());
        }
    }

    /// Fail every call until cleared with `None`.
    pub fn fail_all(&self, error: Option<RemoteError>) {
        self.lock().fail_all = error;
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Count the call and pop any injected failure.
    fn begin(&self, op: RemoteOp) -> RemoteResult<MutexGuard<'_, ServerState>> {
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(error) = state.fail_all.clone() {
            return Err(error);
        }
        if let Some(error) = state
            .scripted_failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(state)
    }

    fn assign_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("srv-{n}")
    }
}

#[async_trait]
impl RemoteApi for InMemoryRemote {
    async fn create(&self, resource: &Resource) -> RemoteResult<Resource> {
        let mut state = self.begin(RemoteOp::Create)?;
        if resource.resource_type.trim().is_empty() {
            return Err(RemoteError::Invalid("resourceType is required".to_string()));
        }

        let mut created = resource.clone();
        if created.id.is_empty() {
            created.id = self.assign_id();
        }
        if state.resources.contains_key(&created.key()) {
            return Err(RemoteError::Conflict(format!(
                "{} already exists",
                created.key()
            )));
        }
        created.meta.version_id = Some(1);
        created.meta.last_updated = Some(self.clock.now());
        state.resources.insert(created.key(), created.clone());
        Ok(created)
    }

    async fn read(&self, resource_type: &str, id: &str) -> RemoteResult<Resource> {
        let state = self.begin(RemoteOp::Read)?;
        state
            .resources
            .get(&ResourceKey::new(resource_type, id))
            .cloned()
            .ok_or_else(|| RemoteError::not_found(resource_type, id))
    }

    async fn update(&self, resource: &Resource) -> RemoteResult<Resource> {
        let mut state = self.begin(RemoteOp::Update)?;
        let key = resource.key();
        let current_version = state
            .resources
            .get(&key)
            .ok_or_else(|| RemoteError::not_found(&key.resource_type, &key.id))?
            .version()
            .unwrap_or(0);

        if let Some(expected) = resource.version() {
            if expected != current_version {
                return Err(RemoteError::Conflict(format!(
                    "{key} is at version {current_version}, update was based on {expected}"
                )));
            }
        }

        let mut updated = resource.clone();
        updated.meta.version_id = Some(current_version + 1);
        updated.meta.last_updated = Some(self.clock.now());
        state.resources.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> RemoteResult<()> {
        let mut state = self.begin(RemoteOp::Delete)?;
        state
            .resources
            .remove(&ResourceKey::new(resource_type, id))
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(resource_type, id))
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> RemoteResult<Vec<Resource>> {
        let state = self.begin(RemoteOp::Search)?;
        Ok(state
            .resources
            .values()
            .filter(|resource| resource.resource_type == resource_type)
            .filter(|resource| match (params.modified_since, resource.last_modified()) {
                (Some(since), Some(modified)) => modified > since,
                _ => true,
            })
            .cloned()
            .collect())
    }
}

/// Remote that is never reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedRemote;

impl DisconnectedRemote {
    fn unavailable() -> RemoteError {
        RemoteError::Unavailable("no remote server configured".to_string())
    }
}

#[async_trait]
impl RemoteApi for DisconnectedRemote {
    async fn create(&self, _resource: &Resource) -> RemoteResult<Resource> {
        Err(Self::unavailable())
    }

    async fn read(&self, _resource_type: &str, _id: &str) -> RemoteResult<Resource> {
        Err(Self::unavailable())
    }

    async fn update(&self, _resource: &Resource) -> RemoteResult<Resource> {
        Err(Self::unavailable())
    }

    async fn delete(&self, _resource_type: &str, _id: &str) -> RemoteResult<()> {
        Err(Self::unavailable())
    }

    async fn search(
        &self,
        _resource_type: &str,
        _params: &SearchParams,
    ) -> RemoteResult<Vec<Resource>> {
        Err(Self::unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn retryable_classification() {
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Conflict("stale".into()).is_retryable());
        assert!(RemoteError::Server("500".into()).is_retryable());
        assert!(!RemoteError::Invalid("bad".into()).is_retryable());
        assert!(RemoteError::not_found("Patient", "p1").is_not_found());
    }

    #[tokio::test]
    async fn create_assigns_id_and_version() {
        let remote = InMemoryRemote::with_clock(Arc::new(ManualClock::new(start())));
        let created = remote
            .create(&Resource::new("Patient", "").with_field("gender", json!("female")))
            .await
            .unwrap();

        assert_eq!(created.id, "srv-1");
        assert_eq!(created.version(), Some(1));
        assert_eq!(created.last_modified(), Some(start()));
        assert_eq!(remote.calls(RemoteOp::Create), 1);
    }

    #[tokio::test]
    async fn update_checks_base_version() {
        let clock = Arc::new(ManualClock::new(start()));
        let remote = InMemoryRemote::with_clock(clock.clone());
        remote.seed(Resource::new("Patient", "p1").with_version(2));

        clock.advance(Duration::minutes(1));
        let stale = Resource::new("Patient", "p1").with_version(1);
        assert!(matches!(
            remote.update(&stale).await,
            Err(RemoteError::Conflict(_))
        ));

        let fresh = Resource::new("Patient", "p1").with_version(2);
        let updated = remote.update(&fresh).await.unwrap();
        assert_eq!(updated.version(), Some(3));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let remote = InMemoryRemote::new();
        let error = remote.delete("Patient", "gone").await.unwrap_err();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let remote = InMemoryRemote::new();
        remote.fail_next(RemoteOp::Search, RemoteError::Timeout);

        assert_eq!(
            remote.search("Patient", &SearchParams::default()).await,
            Err(RemoteError::Timeout)
        );
        assert!(remote
            .search("Patient", &SearchParams::default())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(remote.calls(RemoteOp::Search), 2);
    }

    #[tokio::test]
    async fn search_filters_by_modified_since() {
        let remote = InMemoryRemote::new();
        remote.seed(Resource::new("Observation", "o1").with_last_updated(start()));
        remote.seed(
            Resource::new("Observation", "o2").with_last_updated(start() + Duration::hours(1)),
        );
        remote.seed(Resource::new("Patient", "p1").with_last_updated(start()));

        let found = remote
            .search("Observation", &SearchParams::modified_since(Some(start())))
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["o2"]);
    }

    #[tokio::test]
    async fn disconnected_remote_is_unavailable() {
        let remote = DisconnectedRemote;
        assert!(matches!(
            remote.read("Patient", "p1").await,
            Err(RemoteError::Unavailable(_))
        ));
    }
}
