//! Conflict resolver
//!
//! Turns a (local, remote) pair and a strategy into a [`Resolution`]. Never
//! touches the store; the orchestrator applies the decision.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::merge;
use crate::models::{ConflictStrategy, Resolution, Resource};

/// Caller-supplied resolution for the `custom` strategy.
pub type CustomResolver = Arc<dyn Fn(&Resource, &Resource) -> Resolution + Send + Sync>;

/// Type-specific merge function: `(local, remote, now) -> merged`.
pub type MergeFn = Arc<dyn Fn(&Resource, &Resource, DateTime<Utc>) -> Resource + Send + Sync>;

/// Outcome of [`ConflictResolver::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Resolved(Resolution),
    /// Needs a human decision; nothing was decided
    Manual,
}

#[derive(Clone, Default)]
pub struct ConflictResolver {
    custom: Option<CustomResolver>,
    merges: HashMap<String, MergeFn>,
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("custom", &self.custom.is_some())
            .field("merges", &self.merges.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_custom(mut self, resolver: CustomResolver) -> Self {
        self.custom = Some(resolver);
        self
    }

    /// Override the default merge for one resource type.
    #[must_use]
    pub fn with_merge(mut self, resource_type: impl Into<String>, merge: MergeFn) -> Self {
        self.merges.insert(resource_type.into(), merge);
        self
    }

    pub fn resolve(
        &self,
        local: &Resource,
        remote: &Resource,
        strategy: ConflictStrategy,
        now: DateTime<Utc>,
    ) -> ResolveOutcome {
        let resolution = match strategy {
            ConflictStrategy::LocalWins => {
                Resolution::local_wins(local, "local copy preferred by strategy")
            }
            ConflictStrategy::RemoteWins => {
                Resolution::remote_wins(remote, "server copy preferred by strategy")
            }
            ConflictStrategy::LastWriteWins => last_write_wins(local, remote),
            ConflictStrategy::Merge => {
                let merged = self.merge(local, remote, now);
                Resolution {
                    strategy: ConflictStrategy::Merge,
                    winning_resource: remote.clone(),
                    merged_resource: Some(merged),
                    reason: format!("merged using {} rules", remote.resource_type),
                }
            }
            ConflictStrategy::Manual => return ResolveOutcome::Manual,
            ConflictStrategy::Custom => match &self.custom {
                Some(custom) => custom(local, remote),
                None => Resolution::local_wins(local, "no custom resolver registered"),
            },
        };
        ResolveOutcome::Resolved(resolution)
    }

    fn merge(&self, local: &Resource, remote: &Resource, now: DateTime<Utc>) -> Resource {
        match self.merges.get(&remote.resource_type) {
            Some(merge) => merge(local, remote, now),
            None => merge::merge_by_type(local, remote, now),
        }
    }
}

/// Strictly later `lastModified` wins; ties and missing timestamps go to the
/// server.
pub fn last_write_wins(local: &Resource, remote: &Resource) -> Resolution {
    let local_newer = matches!(
        (local.last_modified(), remote.last_modified()),
        (Some(local_at), Some(remote_at)) if local_at > remote_at
    );
    let mut resolution = if local_newer {
        Resolution::local_wins(local, "local copy modified later")
    } else {
        Resolution::remote_wins(remote, "server copy modified later or at the same time")
    };
    resolution.strategy = ConflictStrategy::LastWriteWins;
    resolution
}
