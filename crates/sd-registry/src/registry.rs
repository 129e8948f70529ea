//! Process-wide task registry.
//!
//! Tasks wait in a priority queue until a concurrency slot is free, then run
//! on the tokio runtime the registry was built on. Every settlement frees a
//! slot and immediately admits the next queued task, so up to
//! `concurrency_limit` actions stay in flight while work remains.
//!
//! All bookkeeping happens inside short critical sections that never span an
//! `.await`; actions themselves run outside the lock.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;
use sd_core::{FetchError, FetchResult, Priority, RegistryConfig, TaskId, TaskStatus};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::handle::TaskHandle;
use crate::queue::{QueueKey, TaskQueue};
use crate::{RegistryError, RegistryResult};

type Action<T> = Box<dyn FnOnce() -> BoxFuture<'static, FetchResult<T>> + Send>;

struct TaskEntry<T> {
    /// Distinguishes this entry from earlier entries registered under the same id.
    generation: u64,
    priority: Priority,
    status: TaskStatus,
    queue_key: Option<QueueKey>,
    action: Option<Action<T>>,
    responder: Option<oneshot::Sender<FetchResult<T>>>,
    /// Cleared on cancellation; a late settlement of an irrelevant task is dropped.
    relevant: bool,
    abort: Option<CancellationToken>,
}

impl<T> TaskEntry<T> {
    fn transition(&mut self, id: &TaskId, next: TaskStatus) -> RegistryResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(RegistryError::IllegalTransition {
                task_id: id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    fn reject_cancelled(&mut self, id: &TaskId) {
        self.relevant = false;
        if let Some(tx) = self.responder.take() {
            let _ = tx.send(Err(FetchError::Cancelled {
                task_id: id.clone(),
            }));
        }
    }
}

struct RegistryState<T> {
    tasks: HashMap<TaskId, TaskEntry<T>>,
    queue: TaskQueue,
    running: usize,
    next_generation: u64,
}

struct Inner<T> {
    state: Mutex<RegistryState<T>>,
    config: RegistryConfig,
    handle: Handle,
}

/// Shared scheduler handle. Clones refer to the same queue and budget.
pub struct TaskRegistry<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for TaskRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> TaskRegistry<T> {
    /// Build a registry on the current tokio runtime.
    pub fn new(config: RegistryConfig) -> RegistryResult<Self> {
        let handle = Handle::try_current().map_err(|_| RegistryError::NoRuntime)?;
        Ok(Self::with_handle(config, handle))
    }

    pub fn with_handle(config: RegistryConfig, handle: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RegistryState {
                    tasks: HashMap::new(),
                    queue: TaskQueue::new(),
                    running: 0,
                    next_generation: 0,
                }),
                config,
                handle,
            }),
        }
    }

    /// Queue `action` under `id` and admit work while slots are free.
    ///
    /// An existing task with the same id is replaced: if it was still queued
    /// it never runs, and its caller observes cancellation either way.
    pub fn add_task<F, Fut>(&self, id: impl Into<TaskId>, action: F, priority: Priority) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = FetchResult<T>> + Send + 'static,
    {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let action: Action<T> = Box::new(move || action().boxed());

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        state.next_generation += 1;
        let generation = state.next_generation;

        if let Some(mut previous) = state.tasks.remove(&id) {
            if previous.status.is_terminal() {
                tracing::trace!(task_id = %id, status = %previous.status, "replacing settled task");
            } else {
                tracing::warn!(task_id = %id, status = %previous.status, "overwriting live registry task");
            }
            if let Some(key) = previous.queue_key.take() {
                state.queue.remove(&key);
            }
            if let Some(token) = previous.abort.take() {
                token.cancel();
            }
            previous.reject_cancelled(&id);
        }

        let queue_key = state.queue.insert(id.clone(), priority);
        state.tasks.insert(
            id.clone(),
            TaskEntry {
                generation,
                priority,
                status: TaskStatus::Idle,
                queue_key: Some(queue_key),
                action: Some(action),
                responder: Some(tx),
                relevant: true,
                abort: None,
            },
        );
        tracing::trace!(task_id = %id, priority, queued = state.queue.len(), "task added");

        self.inner.admit(state);
        TaskHandle::new(id, rx)
    }

    /// Cancel a queued or running task. Its caller is rejected with
    /// [`FetchError::Cancelled`] right away.
    ///
    /// A running action keeps its slot until it settles unless the registry
    /// is configured with `abort_on_cancel`, in which case the action is
    /// dropped at its next suspension point. Returns `false` for unknown or
    /// already settled tasks.
    pub fn cancel_task(&self, id: &TaskId) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let Some(entry) = state.tasks.get_mut(id) else {
            return false;
        };

        match entry.status {
            TaskStatus::Idle => {
                if let Some(key) = entry.queue_key.take() {
                    state.queue.remove(&key);
                }
                entry.action = None;
            }
            TaskStatus::Running => {
                if let Some(token) = entry.abort.take() {
                    token.cancel();
                }
            }
            _ => return false,
        }

        if let Err(err) = entry.transition(id, TaskStatus::Cancelled) {
            tracing::error!(%err, "refusing cancellation");
            return false;
        }
        entry.reject_cancelled(id);
        tracing::debug!(task_id = %id, "task cancelled");
        true
    }

    /// Move a queued task to the sorted position for `priority`.
    ///
    /// Running and settled tasks keep their priority; returns `false` then.
    pub fn update_task_priority(&self, id: &TaskId, priority: Priority) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let Some(entry) = state.tasks.get_mut(id) else {
            return false;
        };
        if entry.status != TaskStatus::Idle {
            return false;
        }

        if let Some(key) = entry.queue_key.take() {
            state.queue.remove(&key);
        }
        entry.priority = priority;
        entry.queue_key = Some(state.queue.insert(id.clone(), priority));
        tracing::trace!(task_id = %id, priority, "task reprioritized");
        true
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.inner.state.lock().tasks.get(id).map(|entry| entry.status)
    }

    pub fn priority(&self, id: &TaskId) -> Option<Priority> {
        self.inner.state.lock().tasks.get(id).map(|entry| entry.priority)
    }

    /// Number of actions currently holding a concurrency slot.
    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Queued task ids in admission order.
    pub fn queued_ids(&self) -> Vec<TaskId> {
        self.inner.state.lock().queue.ids().cloned().collect()
    }

    pub fn task_count(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    pub fn limit(&self) -> usize {
        self.inner.config.concurrency_limit
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Runtime the registry spawns actions on.
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Drop the entry for a settled task. Returns `false` if the task is
    /// unknown or still queued or running.
    pub fn forget_task(&self, id: &TaskId) -> bool {
        let mut state = self.inner.state.lock();
        match state.tasks.get(id) {
            Some(entry) if entry.status.is_terminal() => {
                state.tasks.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Drop every settled entry, returning how many were removed.
    pub fn purge_settled(&self) -> usize {
        let mut state = self.inner.state.lock();
        let before = state.tasks.len();
        state.tasks.retain(|_, entry| !entry.status.is_terminal());
        let purged = before - state.tasks.len();
        if purged > 0 {
            tracing::debug!(purged, "purged settled tasks");
        }
        purged
    }
}

impl<T: Send + 'static> Inner<T> {
    fn has_capacity(&self, running: usize) -> bool {
        self.config.is_unbounded() || running < self.config.concurrency_limit
    }

    /// Start queued tasks, lowest priority first, until the budget is spent.
    fn admit(self: &Arc<Self>, state: &mut RegistryState<T>) {
        while self.has_capacity(state.running) {
            let Some(key) = state.queue.pop_first() else {
                break;
            };
            let Some(entry) = state.tasks.get_mut(&key.id) else {
                tracing::warn!(task_id = %key.id, "queued task has no registry entry");
                continue;
            };
            if entry.queue_key.as_ref() != Some(&key) {
                continue;
            }
            entry.queue_key = None;
            if let Err(err) = entry.transition(&key.id, TaskStatus::Running) {
                tracing::error!(%err, "refusing admission");
                continue;
            }
            let Some(action) = entry.action.take() else {
                continue;
            };

            let token = self.config.abort_on_cancel.then(CancellationToken::new);
            entry.abort = token.clone();
            let generation = entry.generation;
            state.running += 1;
            tracing::debug!(
                task_id = %key.id,
                priority = key.priority,
                running = state.running,
                "task admitted"
            );

            let inner = Arc::clone(self);
            let id = key.id;
            self.handle.spawn(async move {
                let outcome = run_action(action, token).await;
                inner.settle(&id, generation, outcome);
            });
        }
    }

    /// Release the slot held by `id` and deliver its result if still wanted.
    ///
    /// `outcome` is `None` when the action was aborted by cancellation.
    fn settle(self: &Arc<Self>, id: &TaskId, generation: u64, outcome: Option<FetchResult<T>>) {
        let delivery = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.running = state.running.saturating_sub(1);

            let delivery = match state.tasks.get_mut(id) {
                Some(entry) if entry.generation == generation => {
                    entry.abort = None;
                    if entry.status == TaskStatus::Running {
                        let next = match &outcome {
                            Some(Ok(_)) => TaskStatus::Resolved,
                            Some(Err(_)) => TaskStatus::Rejected,
                            None => TaskStatus::Cancelled,
                        };
                        if let Err(err) = entry.transition(id, next) {
                            tracing::error!(%err, "refusing settlement");
                        }
                    }
                    tracing::debug!(task_id = %id, status = %entry.status, "task settled");
                    match (entry.relevant, entry.responder.take(), outcome) {
                        (true, Some(tx), Some(result)) => Some((tx, result)),
                        _ => {
                            tracing::debug!(task_id = %id, "discarding result of cancelled task");
                            None
                        }
                    }
                }
                _ => {
                    tracing::debug!(task_id = %id, "discarding result of replaced task");
                    None
                }
            };

            self.admit(state);
            delivery
        };

        if let Some((tx, result)) = delivery {
            let _ = tx.send(result);
        }
    }
}

/// Run one action to completion, converting a panic into a failure so the
/// slot is always released.
///
/// The action is invoked lazily inside the unwind guard, so a panic while
/// building its future is caught as well as one while polling it.
async fn run_action<T>(action: Action<T>, abort: Option<CancellationToken>) -> Option<FetchResult<T>> {
    let guarded = async move {
        let started = future::lazy(move |_| action()).flatten();
        match AssertUnwindSafe(started).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(FetchError::failed("task action panicked")),
        }
    };
    match abort {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = guarded => Some(result),
        },
        None => Some(guarded.await),
    }
}
