//! Conflict table access

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::{Collection, Store, StoreExt, WriteBatch};
use crate::error::Result;
use crate::models::{ResourceKey, SyncConflict};

pub struct ConflictStore {
    store: Arc<dyn Store>,
}

impl ConflictStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &str) -> Result<Option<SyncConflict>> {
        self.store.get_json(Collection::Conflicts, id)
    }

    pub fn all(&self) -> Result<Vec<SyncConflict>> {
        self.store.scan_json(Collection::Conflicts)
    }

    /// Conflicts filtered by resolution state, oldest first.
    pub fn list(&self, resolved: bool) -> Result<Vec<SyncConflict>> {
        let mut conflicts: Vec<SyncConflict> = self
            .all()?
            .into_iter()
            .filter(|conflict| conflict.is_resolved() == resolved)
            .collect();
        conflicts.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then(a.id.cmp(&b.id)));
        Ok(conflicts)
    }

    pub fn count_unresolved(&self) -> Result<usize> {
        Ok(self
            .all()?
            .iter()
            .filter(|conflict| !conflict.is_resolved())
            .count())
    }

    /// The unresolved conflict recorded for a resource, if any.
    pub fn find_open(&self, key: &ResourceKey) -> Result<Option<SyncConflict>> {
        Ok(self
            .all()?
            .into_iter()
            .find(|conflict| !conflict.is_resolved() && &conflict.key() == key))
    }

    pub fn stage_put(&self, batch: &mut WriteBatch, conflict: &SyncConflict) -> Result<()> {
        batch.put(Collection::Conflicts, conflict.id.clone(), conflict)
    }

    /// Rewrite open conflicts of a resource to its server-assigned id.
    pub fn stage_rekey(
        &self,
        batch: &mut WriteBatch,
        from: &ResourceKey,
        to: &ResourceKey,
    ) -> Result<()> {
        for mut conflict in self.all()? {
            if &conflict.key() == from {
                conflict.resource_id.clone_from(&to.id);
                self.stage_put(batch, &conflict)?;
            }
        }
        Ok(())
    }

    /// Delete resolved conflicts resolved before `cutoff`. Returns the count.
    pub fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut batch = WriteBatch::new();
        for conflict in self.all()? {
            if conflict.resolved_at.is_some_and(|at| at < cutoff) {
                batch.delete(Collection::Conflicts, conflict.id);
            }
        }
        let purged = batch.len();
        self.store.commit(batch)?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{Resolution, Resource};

    fn conflict(id: &str, resource_id: &str, detected_secs: i64) -> SyncConflict {
        let local = Resource::new("Patient", resource_id);
        SyncConflict {
            id: id.to_string(),
            resource_type: "Patient".to_string(),
            resource_id: resource_id.to_string(),
            local_resource: local.clone(),
            remote_resource: local,
            local_version: Some(2),
            remote_version: Some(3),
            detected_at: DateTime::from_timestamp(detected_secs, 0).unwrap(),
            resolution: None,
            resolved_at: None,
            resolved_by: None,
        }
    }

    fn save(conflicts: &ConflictStore, store: &Arc<dyn Store>, conflict: &SyncConflict) {
        let mut batch = WriteBatch::new();
        conflicts.stage_put(&mut batch, conflict).unwrap();
        store.commit(batch).unwrap();
    }

    #[test]
    fn list_and_find_open() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let conflicts = ConflictStore::new(store.clone());

        let open = conflict("c2", "p1", 20);
        let mut closed = conflict("c1", "p1", 10);
        let local = closed.local_resource.clone();
        closed.resolve(
            Resolution::local_wins(&local, "test"),
            "tester",
            DateTime::from_timestamp(30, 0).unwrap(),
        );
        save(&conflicts, &store, &open);
        save(&conflicts, &store, &closed);

        assert_eq!(conflicts.list(false).unwrap(), vec![open.clone()]);
        assert_eq!(conflicts.list(true).unwrap(), vec![closed]);
        assert_eq!(conflicts.count_unresolved().unwrap(), 1);
        assert_eq!(
            conflicts
                .find_open(&ResourceKey::new("Patient", "p1"))
                .unwrap()
                .map(|c| c.id),
            Some("c2".to_string())
        );
    }

    #[test]
    fn purge_keeps_open_and_recent() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let conflicts = ConflictStore::new(store.clone());

        let mut old = conflict("old", "p1", 0);
        let local = old.local_resource.clone();
        old.resolve(
            Resolution::local_wins(&local, "test"),
            "tester",
            DateTime::from_timestamp(100, 0).unwrap(),
        );
        save(&conflicts, &store, &old);
        save(&conflicts, &store, &conflict("open", "p2", 0));

        let purged = conflicts
            .purge_resolved_before(DateTime::from_timestamp(200, 0).unwrap())
            .unwrap();
        assert_eq!(purged, 1);
        assert!(conflicts.get("old").unwrap().is_none());
        assert!(conflicts.get("open").unwrap().is_some());
    }
}
