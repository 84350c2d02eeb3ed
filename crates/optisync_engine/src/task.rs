//! Row tasks and the pending task map.

use std::collections::BTreeMap;

use optisync_core::{Entity, EntityKey};

/// A table row reconciled by a [`TaskQueue`](crate::TaskQueue).
pub trait Row: Entity {
    /// The synthetic "not yet created" row kept at the end of a table.
    fn blank() -> Self;

    /// For delta rows: this row restored to its parent value, with the
    /// delta override's identifier cleared. `None` for rows without a parent.
    fn reverted(&self) -> Option<Self> {
        None
    }
}

/// Reconciliation intent for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// The row was edited: create it if unsaved, else update it.
    Change,
    /// The row should be deleted.
    Delete,
    /// The delta override should be dropped and the parent value restored.
    Undo,
}

/// A pending reconciliation intent.
#[derive(Debug, Clone, PartialEq)]
pub struct Task<T> {
    /// Position of the row when the task was queued.
    pub index: usize,
    /// Row value when the task was queued.
    pub item: T,
    /// What to do.
    pub task_type: TaskType,
    seq: u64,
}

impl<T> Task<T> {
    /// Queue-local sequence number; later tasks have larger numbers.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Latest task per key.
#[derive(Debug)]
pub(crate) struct PendingTasks<T> {
    tasks: BTreeMap<EntityKey, Task<T>>,
    next_seq: u64,
}

impl<T: Clone> PendingTasks<T> {
    pub(crate) fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            next_seq: 1,
        }
    }

    /// Stores a task for `key`, replacing any earlier one.
    pub(crate) fn enqueue(&mut self, key: EntityKey, index: usize, item: T, task_type: TaskType) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.insert(
            key,
            Task {
                index,
                item,
                task_type,
                seq,
            },
        );
        seq
    }

    pub(crate) fn snapshot(&self) -> Vec<(EntityKey, Task<T>)> {
        self.tasks
            .iter()
            .map(|(key, task)| (key.clone(), task.clone()))
            .collect()
    }

    /// Removes the entry for `key` if it is still the task numbered `seq`.
    pub(crate) fn settle(&mut self, key: &EntityKey, seq: u64) -> bool {
        if self.tasks.get(key).map(|task| task.seq) == Some(seq) {
            self.tasks.remove(key);
            true
        } else {
            false
        }
    }

    /// A task for `key` queued after `seq`, if any.
    pub(crate) fn newer_mut(&mut self, key: &EntityKey, seq: u64) -> Option<&mut Task<T>> {
        self.tasks.get_mut(key).filter(|task| task.seq > seq)
    }

    /// Moves the entry under `from` to `to`, replacing anything there.
    pub(crate) fn rekey(&mut self, from: &EntityKey, to: EntityKey) {
        if let Some(task) = self.tasks.remove(from) {
            self.tasks.insert(to, task);
        }
    }

    pub(crate) fn get(&self, key: &EntityKey) -> Option<&Task<T>> {
        self.tasks.get(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
