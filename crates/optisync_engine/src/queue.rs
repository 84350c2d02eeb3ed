//! Per-row task queue for editable tables.
//!
//! Each row converges with the remote independently of the others:
//! - Edits are coalesced per key in a pending task map
//! - A debounced pass runs every pending task concurrently
//! - Only one pass runs at a time, so a row never has two calls in flight
//! - Identifiers issued by the remote are written back under echo
//!   suppression so they do not come back as phantom edits

use std::sync::{Arc, Weak};

use futures::future::join_all;
use optisync_core::{
    ChangeKind, CollectionChange, CoreError, EntityKey, Identifier, ListenerId,
    ObservableCollection,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::echo::EchoGuard;
use crate::error::{SyncError, SyncResult};
use crate::remote::EntityRemote;
use crate::schedule::{Debouncer, SingleFlight};
use crate::stats::{CallOutcome, FlushOutcome, FlushReport, Phase, PhaseReport, ReconcileStats};
use crate::task::{PendingTasks, Row, Task, TaskType};

struct QueueInner<T: Row, R> {
    rows: ObservableCollection<T>,
    remote: R,
    config: QueueConfig,
    pending: Mutex<PendingTasks<T>>,
    echo: EchoGuard,
    flight: SingleFlight,
    debouncer: Debouncer,
    stats: RwLock<ReconcileStats>,
    listener: Mutex<Option<ListenerId>>,
}

impl<T: Row, R> Drop for QueueInner<T, R> {
    fn drop(&mut self) {
        if let Some(id) = self.listener.get_mut().take() {
            self.rows.unsubscribe(id);
        }
    }
}

/// Drives one editable table toward convergence with the remote.
///
/// Cloning yields another handle to the same queue.
///
/// # Example
///
/// ```ignore
/// let rows = ObservableCollection::new(vec![]);
/// let queue = TaskQueue::new(rows.clone(), HeaderRemote::new(client), QueueConfig::default());
///
/// // The editor writes straight into the collection; the queue picks it up.
/// rows.update(0, |row| row.key = "Accept".into())?;
/// ```
pub struct TaskQueue<T: Row, R: EntityRemote<T>> {
    inner: Arc<QueueInner<T, R>>,
}

impl<T: Row, R: EntityRemote<T>> Clone for TaskQueue<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Row, R: EntityRemote<T>> TaskQueue<T, R> {
    /// Attaches a queue to `rows`.
    ///
    /// Appends the trailing blank row if configured and missing, and
    /// subscribes to the collection so direct edits enqueue change tasks.
    pub fn new(rows: ObservableCollection<T>, remote: R, config: QueueConfig) -> Self {
        let debouncer = Debouncer::new(config.debounce);
        let queue = Self {
            inner: Arc::new(QueueInner {
                rows,
                remote,
                config,
                pending: Mutex::new(PendingTasks::new()),
                echo: EchoGuard::new(),
                flight: SingleFlight::default(),
                debouncer,
                stats: RwLock::new(ReconcileStats::default()),
                listener: Mutex::new(None),
            }),
        };
        queue.ensure_trailing_blank();

        let weak: Weak<QueueInner<T, R>> = Arc::downgrade(&queue.inner);
        let id = queue.inner.rows.subscribe(Arc::new(move |change: &CollectionChange| {
            if let Some(inner) = weak.upgrade() {
                TaskQueue { inner }.on_change(change);
            }
        }));
        *queue.inner.listener.lock() = Some(id);
        queue
    }

    /// The observed rows.
    pub fn rows(&self) -> &ObservableCollection<T> {
        &self.inner.rows
    }

    /// The remote this queue writes to.
    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    /// Gets the current stats.
    pub fn stats(&self) -> ReconcileStats {
        self.inner.stats.read().clone()
    }

    /// Number of keys with a pending task.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns true if nothing is waiting to be reconciled.
    pub fn is_settled(&self) -> bool {
        self.inner.pending.lock().is_empty() && !self.inner.flight.is_busy()
    }

    /// Returns the pending task for `key`, if any.
    pub fn pending_task(&self, key: &EntityKey) -> Option<Task<T>> {
        self.inner.pending.lock().get(key).cloned()
    }

    /// Returns true while a pass is in flight.
    pub fn is_flushing(&self) -> bool {
        self.inner.flight.is_busy()
    }

    /// Replaces the row at `index`, as the editor would.
    pub fn edit_row(&self, index: usize, row: T) -> SyncResult<()> {
        self.ensure_open()?;
        self.inner.rows.set(index, row)?;
        Ok(())
    }

    /// Requests deletion of the row at `index`.
    ///
    /// The row stays visible until the remote confirms the delete.
    pub fn delete_row(&self, index: usize) -> SyncResult<()> {
        self.queue_task(index, TaskType::Delete)
    }

    /// Requests that the delta row at `index` revert to its parent value.
    pub fn undo_row(&self, index: usize) -> SyncResult<()> {
        let row = self.row_at(index)?;
        if row.reverted().is_none() {
            return Err(SyncError::UndoUnsupported { index });
        }
        self.queue_task(index, TaskType::Undo)
    }

    /// Queues a task for the row at `index` and schedules a debounced pass.
    ///
    /// Overwrites any pending task for the same key. Dropped silently if
    /// the key is inside an item transaction.
    pub fn queue_task(&self, index: usize, task_type: TaskType) -> SyncResult<()> {
        self.ensure_open()?;
        let item = self.row_at(index)?;
        let key = item.key();
        if self.inner.echo.is_suppressed(&key) {
            self.inner.stats.write().notifications_suppressed += 1;
            debug!(%key, index, "dropping echo of engine write");
            return Ok(());
        }

        let seq = self
            .inner
            .pending
            .lock()
            .enqueue(key.clone(), index, item, task_type);
        debug!(%key, index, seq, ?task_type, "task queued");
        self.schedule_flush();
        Ok(())
    }

    /// Runs `mutate` with notifications for `key` suppressed.
    pub fn item_transaction<O>(&self, key: &EntityKey, mutate: impl FnOnce() -> O) -> O {
        self.inner.echo.item_transaction(key, mutate)
    }

    /// Runs one reconciliation pass over every pending task.
    ///
    /// If a pass is already in flight this one is re-scheduled and
    /// [`FlushOutcome::Deferred`] is returned. Otherwise all pending tasks
    /// run concurrently; remote failures are logged and swallowed. A task is
    /// removed afterwards only if no newer task for its key arrived meanwhile.
    pub async fn flush(&self) -> FlushOutcome {
        let Some(_flight) = self.inner.flight.try_begin() else {
            self.inner.stats.write().passes_deferred += 1;
            debug!("pass already in flight, deferring");
            self.schedule_flush();
            return FlushOutcome::Deferred;
        };

        let tasks = self.inner.pending.lock().snapshot();
        let outcomes = join_all(tasks.iter().map(|(key, task)| self.run_task(key, task))).await;

        let mut phase = PhaseReport::new(Phase::Rows);
        {
            let mut pending = self.inner.pending.lock();
            for ((key, task), outcome) in tasks.iter().zip(outcomes) {
                phase.record(outcome);
                pending.settle(key, task.seq());
            }
        }

        let report = FlushReport {
            phases: vec![phase],
        };
        self.inner.stats.write().record_pass(&report);
        if !tasks.is_empty() {
            info!(
                tasks = tasks.len(),
                succeeded = report.succeeded(),
                failed = report.failed(),
                "row pass complete"
            );
        }
        FlushOutcome::Completed(report)
    }

    /// Stops scheduling passes and detaches from the collection.
    ///
    /// Calls already in flight complete; their results are applied only if
    /// the rows still exist.
    pub fn close(&self) {
        self.inner.debouncer.close();
        if let Some(id) = self.inner.listener.lock().take() {
            self.inner.rows.unsubscribe(id);
        }
    }

    /// Returns true once [`TaskQueue::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.inner.debouncer.is_closed()
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.is_closed() {
            Err(SyncError::Closed)
        } else {
            Ok(())
        }
    }

    fn row_at(&self, index: usize) -> SyncResult<T> {
        let rows = &self.inner.rows;
        rows.get(index).ok_or_else(|| {
            SyncError::from(CoreError::IndexOutOfBounds {
                index,
                len: rows.len(),
            })
        })
    }

    fn on_change(&self, change: &CollectionChange) {
        if change.kind == ChangeKind::Removed || self.is_closed() {
            return;
        }
        if let Err(err) = self.queue_task(change.index, TaskType::Change) {
            debug!(index = change.index, error = %err, "change notification not queued");
        }
    }

    fn schedule_flush(&self) {
        let queue = self.clone();
        self.inner.debouncer.schedule(async move {
            queue.flush().await;
        });
    }

    fn ensure_trailing_blank(&self) {
        if !self.inner.config.trailing_blank {
            return;
        }
        let rows = &self.inner.rows;
        let has_blank = rows
            .get(rows.len().wrapping_sub(1))
            .is_some_and(|last| last.is_unsaved());
        if !has_blank {
            self.inner
                .echo
                .item_transaction(&EntityKey::unsaved(), || rows.push(T::blank()));
        }
    }

    /// Finds the current index of `key`, trying the queued index first.
    fn locate(&self, key: &EntityKey, hint: usize) -> Option<usize> {
        let rows = &self.inner.rows;
        match rows.get(hint) {
            Some(row) if &row.key() == key => Some(hint),
            _ => rows.position(key),
        }
    }

    fn is_trailing(&self, index: usize) -> bool {
        self.inner.config.trailing_blank && index + 1 == self.inner.rows.len()
    }

    async fn run_task(&self, key: &EntityKey, task: &Task<T>) -> CallOutcome {
        let result = match task.task_type {
            TaskType::Change if task.item.is_unsaved() => self.create_row(key, task).await,
            TaskType::Change => self.update_row(task).await,
            TaskType::Delete => self.remove_row(key, task).await,
            TaskType::Undo => self.revert_row(key, task).await,
        };
        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%key, task = ?task.task_type, error = %err, "remote call failed, keeping local value");
                self.inner.stats.write().last_error = Some(err.to_string());
                CallOutcome::Failed
            }
        }
    }

    async fn create_row(&self, key: &EntityKey, task: &Task<T>) -> SyncResult<CallOutcome> {
        let id = self.inner.remote.create(&task.item).await?;
        let new_key = {
            let mut attached = task.item.clone();
            attached.set_identifier(id);
            attached.key()
        };

        match self.locate(key, task.index) {
            Some(index) => {
                let rows = &self.inner.rows;
                self.inner
                    .echo
                    .item_transaction(&new_key, || rows.update(index, |row| row.set_identifier(id)))?;
                self.ensure_trailing_blank();
            }
            None => debug!(%key, %id, "row vanished before create returned, discarding"),
        }

        // A newer edit of the same row must now route to update.
        self.restamp_newer(key, task.seq(), id, Some(new_key));
        Ok(CallOutcome::Succeeded)
    }

    async fn update_row(&self, task: &Task<T>) -> SyncResult<CallOutcome> {
        self.inner.remote.update(&task.item).await?;
        Ok(CallOutcome::Succeeded)
    }

    async fn remove_row(&self, key: &EntityKey, task: &Task<T>) -> SyncResult<CallOutcome> {
        let rows = &self.inner.rows;
        if task.item.is_unsaved() {
            // Never created remotely; purely local.
            if let Some(index) = self.locate(key, task.index) {
                if self.is_trailing(index) {
                    self.inner
                        .echo
                        .item_transaction(key, || rows.set(index, T::blank()))?;
                } else {
                    self.inner.echo.item_transaction(key, || rows.remove(index))?;
                }
            }
            return Ok(CallOutcome::Skipped);
        }

        self.inner.remote.delete(&task.item).await?;
        match self.locate(key, task.index) {
            Some(index) => {
                self.inner.echo.item_transaction(key, || rows.remove(index))?;
                self.ensure_trailing_blank();
            }
            None => debug!(%key, "row vanished before delete returned"),
        }
        Ok(CallOutcome::Succeeded)
    }

    async fn revert_row(&self, key: &EntityKey, task: &Task<T>) -> SyncResult<CallOutcome> {
        let Some(restored) = task.item.reverted() else {
            return Err(SyncError::UndoUnsupported { index: task.index });
        };

        let outcome = if task.item.is_unsaved() {
            CallOutcome::Skipped
        } else {
            self.inner.remote.delete(&task.item).await?;
            CallOutcome::Succeeded
        };

        match self.locate(key, task.index) {
            Some(index) => {
                let rows = &self.inner.rows;
                self.inner
                    .echo
                    .item_transaction(key, || rows.set(index, restored))?;
            }
            None => debug!(%key, "row vanished before undo returned"),
        }

        // The override is gone; a newer edit has to create a fresh one.
        self.restamp_newer(key, task.seq(), Identifier::empty(), None);
        Ok(outcome)
    }

    fn restamp_newer(&self, key: &EntityKey, seq: u64, id: Identifier, rekey: Option<EntityKey>) {
        let mut pending = self.inner.pending.lock();
        let Some(newer) = pending.newer_mut(key, seq) else {
            return;
        };
        newer.item.set_identifier(id);
        if let Some(new_key) = rekey.filter(|new_key| new_key != key) {
            pending.rekey(key, new_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRemote, RemoteOp};
    use optisync_core::Entity;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Param {
        id: Identifier,
        name: String,
        value: String,
    }

    impl Entity for Param {
        fn identifier(&self) -> &Identifier {
            &self.id
        }

        fn set_identifier(&mut self, id: Identifier) {
            self.id = id;
        }
    }

    impl Row for Param {
        fn blank() -> Self {
            Self {
                id: Identifier::empty(),
                name: String::new(),
                value: String::new(),
            }
        }
    }

    fn named(name: &str) -> Param {
        Param {
            name: name.into(),
            ..Param::blank()
        }
    }

    fn queue() -> TaskQueue<Param, MemoryRemote<Param>> {
        TaskQueue::new(
            ObservableCollection::new(Vec::new()),
            MemoryRemote::new("params"),
            QueueConfig::manual(),
        )
    }

    #[test]
    fn appends_trailing_blank() {
        let queue = queue();
        assert_eq!(queue.rows().items(), vec![Param::blank()]);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn no_trailing_blank_when_disabled() {
        let queue = TaskQueue::new(
            ObservableCollection::new(Vec::new()),
            MemoryRemote::<Param>::new("params"),
            QueueConfig::manual().without_trailing_blank(),
        );
        assert!(queue.rows().is_empty());
    }

    #[test]
    fn direct_edits_are_queued() {
        let queue = queue();
        queue.rows().update(0, |row| row.name = "page".into()).unwrap();
        assert_eq!(queue.pending_len(), 1);

        let task = queue.pending_task(&EntityKey::unsaved()).unwrap();
        assert_eq!(task.task_type, TaskType::Change);
        assert_eq!(task.item.name, "page");
    }

    #[test]
    fn bad_index_is_an_error() {
        let queue = queue();
        assert!(matches!(
            queue.delete_row(5),
            Err(SyncError::Core(CoreError::IndexOutOfBounds { index: 5, len: 1 }))
        ));
        assert_eq!(
            queue.undo_row(0),
            Err(SyncError::UndoUnsupported { index: 0 })
        );
    }

    #[tokio::test]
    async fn create_attaches_identifier_and_appends_blank() {
        let queue = queue();
        queue.edit_row(0, named("page")).unwrap();

        let report = queue.flush().await.report().cloned().unwrap();
        assert_eq!(report.succeeded(), 1);

        let rows = queue.rows().items();
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].id.is_empty());
        assert_eq!(rows[0].name, "page");
        assert_eq!(rows[1], Param::blank());

        // Attaching the identifier and appending the blank row were echoes.
        assert!(queue.is_settled());
        assert_eq!(queue.stats().notifications_suppressed, 2);

        let calls = queue.remote().log().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].op, RemoteOp::Create);
        assert_eq!(calls[0].payload, json!({"name": "page", "value": ""}));
    }

    #[tokio::test]
    async fn saved_rows_update() {
        let queue = queue();
        queue.edit_row(0, named("page")).unwrap();
        queue.flush().await;

        queue.rows().update(0, |row| row.value = "2".into()).unwrap();
        queue.flush().await;

        assert_eq!(
            queue.remote().log().ops().into_iter().map(|(_, op)| op).collect::<Vec<_>>(),
            vec![RemoteOp::Create, RemoteOp::Update]
        );
        let id = queue.rows().get(0).unwrap().id;
        assert_eq!(queue.remote().get(&id).unwrap().value, "2");
    }

    #[tokio::test]
    async fn delete_removes_row_after_remote_confirms() {
        let queue = queue();
        queue.edit_row(0, named("page")).unwrap();
        queue.flush().await;
        assert_eq!(queue.rows().len(), 2);

        queue.delete_row(0).unwrap();
        assert_eq!(queue.rows().len(), 2);
        queue.flush().await;

        assert_eq!(queue.rows().items(), vec![Param::blank()]);
        assert!(queue.remote().is_empty());
        assert!(queue.is_settled());
    }

    #[tokio::test]
    async fn deleting_unsaved_trailing_row_clears_it_locally() {
        let queue = queue();
        queue.edit_row(0, named("draft")).unwrap();
        queue.delete_row(0).unwrap();

        let report = queue.flush().await.report().cloned().unwrap();
        assert_eq!(report.attempted(), 0);
        assert_eq!(report.skipped(), 1);
        assert_eq!(queue.rows().items(), vec![Param::blank()]);
        assert!(queue.remote().log().is_empty());
    }

    #[tokio::test]
    async fn failed_create_is_swallowed() {
        let queue = queue();
        queue.remote().fail_next(1);
        queue.edit_row(0, named("page")).unwrap();

        let report = queue.flush().await.report().cloned().unwrap();
        assert_eq!(report.failed(), 1);
        assert!(queue.is_settled());
        assert!(queue.rows().get(0).unwrap().is_unsaved());
        assert!(queue.stats().last_error.is_some());

        // The next edit re-attempts the create.
        queue.rows().update(0, |row| row.value = "1".into()).unwrap();
        queue.flush().await;
        assert!(!queue.rows().get(0).unwrap().is_unsaved());
        assert_eq!(queue.remote().len(), 1);
    }

    #[tokio::test]
    async fn closed_queue_rejects_intents() {
        let queue = queue();
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.edit_row(0, named("x")), Err(SyncError::Closed));
        assert_eq!(queue.rows().listener_count(), 0);
    }

    #[test]
    fn dropping_queue_detaches_listener() {
        let rows = ObservableCollection::new(Vec::new());
        let queue = TaskQueue::new(rows.clone(), MemoryRemote::<Param>::new("p"), QueueConfig::manual());
        assert_eq!(rows.listener_count(), 1);
        drop(queue);
        assert_eq!(rows.listener_count(), 0);
    }
}
