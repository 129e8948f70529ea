//! Priority queue of idle tasks.
//!
//! Keys order by `(priority, order)`, where `order` is a monotonically
//! increasing insertion counter. Equal priorities therefore stay FIFO, and a
//! reinserted task lands behind every task already queued at its priority.

use std::collections::BTreeSet;

use sd_core::{Priority, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueKey {
    pub priority: Priority,
    pub order: u64,
    pub id: TaskId,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    keys: BTreeSet<QueueKey>,
    next_order: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: TaskId, priority: Priority) -> QueueKey {
        let key = QueueKey {
            priority,
            order: self.next_order,
            id,
        };
        self.next_order += 1;
        self.keys.insert(key.clone());
        key
    }

    pub fn remove(&mut self, key: &QueueKey) -> bool {
        self.keys.remove(key)
    }

    /// Remove and return the task that should run next.
    pub fn pop_first(&mut self) -> Option<QueueKey> {
        self.keys.pop_first()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Queued ids, next-to-run first.
    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.keys.iter().map(|key| &key.id)
    }
}
