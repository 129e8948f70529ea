//! Per-item fetch schedule over time steps.
//!
//! Every step gets at most one live registry task. Its result is memoized as
//! a [`StepFuture`] so concurrent requests for the same step share one
//! network call. Moving the current step reprioritizes pending steps and
//! prefetches a window of upcoming ones.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture, Shared};
use parking_lot::Mutex;
use sd_core::{
    FetchError, FetchResult, FetcherConfig, ItemId, ItemMetadata, Priority, StepStatus, TaskId,
    Timestep, step_priority,
};
use sd_registry::TaskRegistry;

use crate::source::PlotSource;

/// Shared result of one step. Clones observe the same fetch.
pub type StepFuture<P> = Shared<BoxFuture<'static, FetchResult<P>>>;

/// Shared result of the metadata request.
pub type MetadataFuture = Shared<BoxFuture<'static, FetchResult<Arc<ItemMetadata>>>>;

struct StepTask<P> {
    id: TaskId,
    /// Distinguishes a replacement task from the one it replaced.
    attempt: u64,
    status: StepStatus,
    result: StepFuture<P>,
}

struct FetcherState<P> {
    metadata: Option<MetadataFuture>,
    info: Option<Arc<ItemMetadata>>,
    initialized: bool,
    current: Option<Timestep>,
    available: Vec<Timestep>,
    tasks: BTreeMap<Timestep, StepTask<P>>,
    next_attempt: u64,
}

/// Fetch scheduler for one item shown in one panel.
pub struct PlotFetcher<S: PlotSource> {
    item_id: ItemId,
    seed: u64,
    source: Arc<S>,
    registry: TaskRegistry<S::Raw>,
    config: FetcherConfig,
    state: Arc<Mutex<FetcherState<S::Payload>>>,
}

impl<S: PlotSource> Clone for PlotFetcher<S> {
    fn clone(&self) -> Self {
        Self {
            item_id: self.item_id.clone(),
            seed: self.seed,
            source: Arc::clone(&self.source),
            registry: self.registry.clone(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<S: PlotSource> PlotFetcher<S> {
    /// Create a fetcher with a random seed for its registry task ids.
    pub fn new(
        item_id: ItemId,
        source: Arc<S>,
        registry: TaskRegistry<S::Raw>,
        config: FetcherConfig,
    ) -> Self {
        Self::with_seed(item_id, source, registry, config, rand::random())
    }

    pub fn with_seed(
        item_id: ItemId,
        source: Arc<S>,
        registry: TaskRegistry<S::Raw>,
        config: FetcherConfig,
        seed: u64,
    ) -> Self {
        Self {
            item_id,
            seed,
            source,
            registry,
            config,
            state: Arc::new(Mutex::new(FetcherState {
                metadata: None,
                info: None,
                initialized: false,
                current: None,
                available: Vec::new(),
                tasks: BTreeMap::new(),
                next_attempt: 0,
            })),
        }
    }

    /// Request item metadata once and learn the available steps.
    ///
    /// Every call returns the same shared future, before and after it
    /// resolves. A failed request is reissued by the next call.
    pub fn initialize(&self) -> MetadataFuture {
        let mut state = self.state.lock();
        if let Some(metadata) = &state.metadata {
            if !matches!(metadata.peek(), Some(Err(_))) {
                return metadata.clone();
            }
            tracing::debug!(item_id = %self.item_id, "retrying failed metadata request");
        }

        let source = Arc::clone(&self.source);
        let item_id = self.item_id.clone();
        let weak = Arc::downgrade(&self.state);
        let metadata = async move {
            let metadata = match source.metadata(&item_id).await {
                Ok(metadata) => Arc::new(metadata),
                Err(err) => {
                    tracing::warn!(item_id = %item_id, %err, "metadata request failed");
                    return Err(err);
                }
            };
            let steps = metadata.sorted_steps();
            tracing::debug!(item_id = %item_id, steps = steps.len(), "fetcher initialized");
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock();
                state.available = steps;
                state.info = Some(Arc::clone(&metadata));
                state.initialized = true;
            }
            Ok(metadata)
        }
        .boxed()
        .shared();

        state.metadata = Some(metadata.clone());
        metadata
    }

    /// Move the viewer to `timestep`.
    ///
    /// Pending steps are reprioritized relative to the new step. With
    /// `prefetch`, the step and up to `look_ahead` following available steps
    /// get tasks unless they already have a pending or resolved one.
    pub fn set_current_timestep(&self, timestep: Timestep, prefetch: bool) -> FetchResult<()> {
        let mut guard = self.state.lock();
        self.ensure_initialized(&guard)?;
        let state = &mut *guard;
        state.current = Some(timestep);

        for (&step, task) in &state.tasks {
            if task.status == StepStatus::Pending {
                self.registry
                    .update_task_priority(&task.id, step_priority(step, timestep));
            }
        }

        if prefetch {
            self.prefetch(state, timestep);
        }
        self.enforce_retention(state, timestep);
        Ok(())
    }

    /// Shared future for `timestep`, starting a fetch if none exists yet.
    ///
    /// Any existing task is reused as-is, including a failed one; use
    /// [`refetch_timestep`](Self::refetch_timestep) to retry.
    pub fn get_timestep_plot(&self, timestep: Timestep) -> FetchResult<StepFuture<S::Payload>> {
        let mut guard = self.state.lock();
        self.ensure_initialized(&guard)?;
        let state = &mut *guard;

        if let Some(task) = state.tasks.get(&timestep) {
            return Ok(task.result.clone());
        }

        let reference = state.current.unwrap_or(timestep);
        Ok(self.start_step(state, timestep, step_priority(timestep, reference)))
    }

    /// Like [`get_timestep_plot`](Self::get_timestep_plot), but a rejected or
    /// cancelled step gets a fresh task.
    pub fn refetch_timestep(&self, timestep: Timestep) -> FetchResult<StepFuture<S::Payload>> {
        let mut guard = self.state.lock();
        self.ensure_initialized(&guard)?;
        let state = &mut *guard;

        if let Some(task) = state.tasks.get(&timestep)
            && task.status.is_reusable()
        {
            return Ok(task.result.clone());
        }

        let reference = state.current.unwrap_or(timestep);
        Ok(self.start_step(state, timestep, step_priority(timestep, reference)))
    }

    /// Cancel the registry task behind a pending step.
    pub fn cancel_timestep(&self, timestep: Timestep) -> bool {
        let state = self.state.lock();
        match state.tasks.get(&timestep) {
            Some(task) if task.status == StepStatus::Pending => self.registry.cancel_task(&task.id),
            _ => false,
        }
    }

    pub fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn look_ahead(&self) -> usize {
        self.config.look_ahead
    }

    pub fn registry(&self) -> &TaskRegistry<S::Raw> {
        &self.registry
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn current_timestep(&self) -> Option<Timestep> {
        self.state.lock().current
    }

    /// Available steps in ascending order; empty until initialized.
    pub fn available_timesteps(&self) -> Vec<Timestep> {
        self.state.lock().available.clone()
    }

    pub fn metadata(&self) -> Option<Arc<ItemMetadata>> {
        self.state.lock().info.clone()
    }

    pub fn step_status(&self, timestep: Timestep) -> Option<StepStatus> {
        self.state.lock().tasks.get(&timestep).map(|task| task.status)
    }

    pub fn task_id(&self, timestep: Timestep) -> Option<TaskId> {
        self.state.lock().tasks.get(&timestep).map(|task| task.id.clone())
    }

    /// Steps with a task, in ascending order.
    pub fn tracked_timesteps(&self) -> Vec<Timestep> {
        self.state.lock().tasks.keys().copied().collect()
    }

    /// Steps whose payload has been resolved.
    pub fn loaded_timesteps(&self) -> Vec<Timestep> {
        self.state
            .lock()
            .tasks
            .iter()
            .filter(|(_, task)| task.status == StepStatus::Resolved)
            .map(|(&step, _)| step)
            .collect()
    }

    fn ensure_initialized(&self, state: &FetcherState<S::Payload>) -> FetchResult<()> {
        if state.initialized {
            Ok(())
        } else {
            Err(FetchError::Uninitialized {
                item_id: self.item_id.clone(),
            })
        }
    }

    fn prefetch(&self, state: &mut FetcherState<S::Payload>, timestep: Timestep) {
        let Ok(idx) = state.available.binary_search(&timestep) else {
            tracing::trace!(item_id = %self.item_id, timestep, "step not available, no prefetch");
            return;
        };
        let end = idx
            .saturating_add(self.config.look_ahead)
            .saturating_add(1)
            .min(state.available.len());
        let window = state.available[idx..end].to_vec();

        for &step in &window {
            let reusable = state
                .tasks
                .get(&step)
                .is_some_and(|task| task.status.is_reusable());
            if !reusable {
                self.schedule_step(state, step, step_priority(step, timestep));
            }
        }
        tracing::debug!(item_id = %self.item_id, ?window, "prefetch window scheduled");
    }

    /// Submit a registry task for `timestep` without handing out its future.
    ///
    /// The step future stays memoized in `state.tasks` and is driven by its
    /// own spawned task.
    fn schedule_step(&self, state: &mut FetcherState<S::Payload>, timestep: Timestep, priority: Priority) {
        drop(self.start_step(state, timestep, priority));
    }

    /// Submit a registry task for `timestep` and memoize its step future.
    fn start_step(
        &self,
        state: &mut FetcherState<S::Payload>,
        timestep: Timestep,
        priority: Priority,
    ) -> StepFuture<S::Payload> {
        state.next_attempt += 1;
        let attempt = state.next_attempt;
        let id = TaskId::for_step(self.seed, &self.item_id, timestep);

        let source = Arc::clone(&self.source);
        let item_id = self.item_id.clone();
        let handle = self.registry.add_task(
            id.clone(),
            move || source.fetch_timestep(&item_id, timestep),
            priority,
        );

        let source = Arc::clone(&self.source);
        let weak = Arc::downgrade(&self.state);
        let task_id = id.clone();
        let result = async move {
            let outcome = match handle.await {
                Ok(raw) if is_live(&weak, timestep, attempt) => {
                    let resolving = future::lazy(move |_| source.resolve_timestep(raw, timestep));
                    match AssertUnwindSafe(resolving.flatten()).catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            tracing::error!(timestep, "resolve_timestep panicked");
                            Err(FetchError::failed(format!("resolving step {timestep} panicked")))
                        }
                    }
                }
                Ok(_) => Err(FetchError::Cancelled { task_id }),
                Err(err) => Err(err),
            };
            let status = match &outcome {
                Ok(_) => StepStatus::Resolved,
                Err(err) if err.is_cancelled() => StepStatus::Cancelled,
                Err(_) => StepStatus::Rejected,
            };
            record_settlement(&weak, timestep, attempt, status);
            outcome
        }
        .boxed()
        .shared();

        // Drive the step even when nobody awaits it, so prefetched payloads resolve.
        self.registry.handle().spawn(result.clone().map(drop));

        state.tasks.insert(
            timestep,
            StepTask {
                id,
                attempt,
                status: StepStatus::Pending,
                result: result.clone(),
            },
        );
        result
    }

    /// Evict the settled steps farthest from `current` beyond the configured bound.
    fn enforce_retention(&self, state: &mut FetcherState<S::Payload>, current: Timestep) {
        let Some(max_settled) = self.config.max_settled_steps else {
            return;
        };
        let mut settled: Vec<Timestep> = state
            .tasks
            .iter()
            .filter(|(_, task)| task.status.is_settled())
            .map(|(&step, _)| step)
            .collect();
        if settled.len() <= max_settled {
            return;
        }

        settled.sort_by_key(|&step| Reverse(step.abs_diff(current)));
        let excess = settled.len() - max_settled;
        for step in settled.into_iter().take(excess) {
            if let Some(task) = state.tasks.remove(&step) {
                self.registry.forget_task(&task.id);
            }
        }
        tracing::debug!(item_id = %self.item_id, evicted = excess, "evicted settled steps");
    }
}

/// Whether the task `attempt` still backs `timestep` and is pending.
fn is_live<P>(state: &Weak<Mutex<FetcherState<P>>>, timestep: Timestep, attempt: u64) -> bool {
    let Some(state) = state.upgrade() else {
        return false;
    };
    let state = state.lock();
    state
        .tasks
        .get(&timestep)
        .is_some_and(|task| task.attempt == attempt && task.status == StepStatus::Pending)
}

fn record_settlement<P>(
    state: &Weak<Mutex<FetcherState<P>>>,
    timestep: Timestep,
    attempt: u64,
    status: StepStatus,
) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = state.lock();
    if let Some(task) = state.tasks.get_mut(&timestep)
        && task.attempt == attempt
        && task.status == StepStatus::Pending
    {
        task.status = status;
    }
}
