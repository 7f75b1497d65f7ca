//! Bounded rolling error log

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::{Collection, Store, StoreExt, WriteBatch};
use crate::error::Result;
use crate::models::SyncErrorRecord;

use super::ERROR_LOG_KEY;

/// Most recent sync errors, oldest first, capped at `limit` entries.
pub struct ErrorLog {
    store: Arc<dyn Store>,
    limit: usize,
}

impl ErrorLog {
    pub fn new(store: Arc<dyn Store>, limit: usize) -> Self {
        Self {
            store,
            limit: limit.max(1),
        }
    }

    pub fn entries(&self) -> Result<Vec<SyncErrorRecord>> {
        Ok(self
            .store
            .get_json(Collection::Metadata, ERROR_LOG_KEY)?
            .unwrap_or_default())
    }

    /// Stage the log with `records` appended, trimmed to the limit.
    pub fn stage_append(
        &self,
        batch: &mut WriteBatch,
        records: impl IntoIterator<Item = SyncErrorRecord>,
    ) -> Result<()> {
        let mut entries = self.entries()?;
        entries.extend(records);
        if entries.len() > self.limit {
            let overflow = entries.len() - self.limit;
            entries.drain(..overflow);
        }
        batch.put(Collection::Metadata, ERROR_LOG_KEY, &entries)
    }

    pub fn append(&self, record: SyncErrorRecord) -> Result<()> {
        let mut batch = WriteBatch::new();
        self.stage_append(&mut batch, [record])?;
        self.store.commit(batch)
    }

    /// Drop records for a queue item that left the failed state.
    pub fn stage_forget_item(&self, batch: &mut WriteBatch, item_id: &str) -> Result<()> {
        let entries: Vec<SyncErrorRecord> = self
            .entries()?
            .into_iter()
            .filter(|record| record.item_id.as_deref() != Some(item_id))
            .collect();
        batch.put(Collection::Metadata, ERROR_LOG_KEY, &entries)
    }

    /// Remove records older than `cutoff`. Returns how many were dropped.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let entries = self.entries()?;
        let before = entries.len();
        let kept: Vec<SyncErrorRecord> = entries
            .into_iter()
            .filter(|record| record.occurred_at >= cutoff)
            .collect();
        let purged = before - kept.len();
        if purged > 0 {
            let mut batch = WriteBatch::new();
            batch.put(Collection::Metadata, ERROR_LOG_KEY, &kept)?;
            self.store.commit(batch)?;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::SyncErrorKind;

    fn record(id: &str, secs: i64) -> SyncErrorRecord {
        SyncErrorRecord {
            id: id.to_string(),
            item_id: Some(format!("item-{id}")),
            resource_type: "Patient".to_string(),
            resource_id: Some("p1".to_string()),
            operation: None,
            kind: SyncErrorKind::Transient,
            message: "timeout".to_string(),
            terminal: false,
            occurred_at: DateTime::from_timestamp(secs, 0).unwrap(),
        }
    }

    #[test]
    fn log_is_bounded_to_most_recent() {
        let log = ErrorLog::new(Arc::new(MemoryStore::new()), 2);
        log.append(record("a", 1)).unwrap();
        log.append(record("b", 2)).unwrap();
        log.append(record("c", 3)).unwrap();

        let ids: Vec<String> = log.entries().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn purge_drops_records_before_cutoff() {
        let log = ErrorLog::new(Arc::new(MemoryStore::new()), 10);
        log.append(record("old", 10)).unwrap();
        log.append(record("new", 100)).unwrap();

        let purged = log
            .purge_older_than(DateTime::from_timestamp(50, 0).unwrap())
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(log.entries().unwrap().len(), 1);
    }

    #[test]
    fn forget_item() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let log = ErrorLog::new(store.clone(), 10);
        log.append(record("a", 1)).unwrap();
        log.append(record("b", 2)).unwrap();

        let mut batch = WriteBatch::new();
        log.stage_forget_item(&mut batch, "item-a").unwrap();
        store.commit(batch).unwrap();
        assert_eq!(log.entries().unwrap().len(), 1);
    }
}
