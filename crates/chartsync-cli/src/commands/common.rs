use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chartsync_core::models::{QueueItemStatus, SyncErrorRecord};
use chartsync_core::util::compact_text;
use chartsync_core::{
    DisconnectedRemote, SqliteStore, SyncConfig, SyncConflict, SyncEngine, SyncQueueItem,
    SyncStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CliError;

/// Where the local store and its configuration live.
#[derive(Debug, Clone)]
pub struct StoreTarget {
    pub db_path: PathBuf,
    pub config_path: Option<PathBuf>,
}

impl StoreTarget {
    pub fn load_config(&self) -> Result<SyncConfig, CliError> {
        match &self.config_path {
            Some(path) => Ok(SyncConfig::load(path)?),
            None => Ok(SyncConfig::default()),
        }
    }

    /// Open the store with an engine that never talks to the server.
    pub fn open_engine(&self) -> Result<SyncEngine, CliError> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let config = self.load_config()?;
        let store = SqliteStore::open(&self.db_path)?;
        tracing::debug!(path = %self.db_path.display(), "opened local store");
        Ok(
            SyncEngine::builder(Arc::new(store), Arc::new(DisconnectedRemote))
                .config(config)
                .build()?,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct QueueListItem {
    pub id: String,
    pub resource: String,
    pub operation: String,
    pub priority: String,
    pub status: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: String,
    pub next_retry_at: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConflictListItem {
    pub id: String,
    pub resource: String,
    pub local_version: Option<u64>,
    pub remote_version: Option<u64>,
    pub detected_at: String,
    pub strategy: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<String>,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("CHARTSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chartsync")
        .join("chartsync.db")
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> Option<PathBuf> {
    cli_config.or_else(|| env::var_os("CHARTSYNC_CONFIG").map(PathBuf::from))
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub const fn status_label(status: QueueItemStatus) -> &'static str {
    match status {
        QueueItemStatus::Pending => "pending",
        QueueItemStatus::InFlight => "in-flight",
        QueueItemStatus::AwaitingResolution => "awaiting",
        QueueItemStatus::Failed => "failed",
    }
}

pub fn queue_item_to_list_item(item: &SyncQueueItem) -> QueueListItem {
    QueueListItem {
        id: item.id.clone(),
        resource: item.key().to_string(),
        operation: item.operation.to_string(),
        priority: item.priority.to_string(),
        status: status_label(item.status).to_string(),
        attempts: item.attempts,
        max_attempts: item.max_attempts,
        created_at: format_timestamp(item.created_at),
        next_retry_at: item.next_retry_at.map(format_timestamp),
        last_error: item.last_error.as_deref().map(compact_text),
    }
}

pub fn format_queue_lines(items: &[SyncQueueItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let mut line = format!(
                "{}  {:<6}  {:<8}  {:<9}  {}  attempts={}/{}",
                item.id,
                item.operation,
                item.priority,
                status_label(item.status),
                item.key(),
                item.attempts,
                item.max_attempts
            );
            if let Some(error) = &item.last_error {
                line.push_str("  error=");
                line.push_str(&compact_text(error));
            }
            line
        })
        .collect()
}

pub fn conflict_to_list_item(conflict: &SyncConflict) -> ConflictListItem {
    ConflictListItem {
        id: conflict.id.clone(),
        resource: conflict.key().to_string(),
        local_version: conflict.local_version,
        remote_version: conflict.remote_version,
        detected_at: format_timestamp(conflict.detected_at),
        strategy: conflict
            .resolution
            .as_ref()
            .map(|resolution| resolution.strategy.to_string()),
        resolved_by: conflict.resolved_by.clone(),
        resolved_at: conflict.resolved_at.map(format_timestamp),
    }
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let versions = format!(
                "local=v{} remote=v{}",
                conflict
                    .local_version
                    .map_or_else(|| "?".to_string(), |v| v.to_string()),
                conflict
                    .remote_version
                    .map_or_else(|| "?".to_string(), |v| v.to_string()),
            );
            match (&conflict.resolution, &conflict.resolved_by) {
                (Some(resolution), by) => format!(
                    "{}  {}  {}  {}  by={}",
                    conflict.id,
                    conflict.key(),
                    versions,
                    resolution.strategy,
                    by.as_deref().unwrap_or("-")
                ),
                (None, _) => format!(
                    "{}  {}  {}  detected {}",
                    conflict.id,
                    conflict.key(),
                    versions,
                    format_timestamp(conflict.detected_at)
                ),
            }
        })
        .collect()
}

fn format_error_line(record: &SyncErrorRecord) -> String {
    let subject = record.resource_id.as_ref().map_or_else(
        || record.resource_type.clone(),
        |id| format!("{}/{id}", record.resource_type),
    );
    format!(
        "{}  {:?}{}  {}  {}",
        format_timestamp(record.occurred_at),
        record.kind,
        if record.terminal { " (terminal)" } else { "" },
        subject,
        compact_text(&record.message)
    )
}

pub fn format_status_lines(status: &SyncStatus) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Last sync:   {}",
            status
                .last_sync_at
                .map_or_else(|| "never".to_string(), format_timestamp)
        ),
        format!("Pending:     {}", status.pending_changes),
        format!("Failed:      {}", status.failed_changes),
        format!("Conflicts:   {}", status.conflicted_changes),
    ];
    if !status.errors.is_empty() {
        lines.push(format!("Recent errors ({}):", status.errors.len()));
        lines.extend(
            status
                .errors
                .iter()
                .rev()
                .take(10)
                .map(|record| format!("  {}", format_error_line(record))),
        );
    }
    lines
}

/// Export destination: a directory gets a generated file name.
pub fn export_destination(output: &Path, now_ms: i64) -> PathBuf {
    if output.is_dir() {
        output.join(chartsync_core::export::suggested_export_file_name(now_ms))
    } else {
        output.to_path_buf()
    }
}
