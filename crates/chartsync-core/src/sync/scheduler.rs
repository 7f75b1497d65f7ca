//! Due-time task queue
//!
//! Periodic passes and retry wake-ups are plain entries in a min-heap keyed
//! by due time. Nothing here sleeps: the engine asks for due tasks against
//! its injected clock, so tests advance time explicitly.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScheduledTask {
    /// Regular timer-driven pass
    PeriodicSync,
    /// A backed-off queue item becomes due
    RetryDue,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, u64, ScheduledTask)>>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due_at: DateTime<Utc>, task: ScheduledTask) {
        self.seq += 1;
        self.heap.push(Reverse((due_at, self.seq, task)));
    }

    /// Schedule `task` unless an equal task is already due at or before
    /// `due_at`.
    pub fn schedule_once(&mut self, due_at: DateTime<Utc>, task: ScheduledTask) {
        let covered = self
            .heap
            .iter()
            .any(|Reverse((at, _, queued))| *queued == task && *at <= due_at);
        if !covered {
            self.schedule(due_at, task);
        }
    }

    /// Pop every task due at `now`, earliest first. Duplicates collapse.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        let mut due = Vec::new();
        while let Some(Reverse((at, _, task))) = self.heap.peek().copied() {
            if at > now {
                break;
            }
            self.heap.pop();
            if !due.contains(&task) {
                due.push(task);
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
