//! Recording in-memory source for fetcher tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use sd_core::{FetchError, FetchResult, ItemId, ItemMetadata, RegistryConfig, Timestep};
use sd_fetcher::PlotSource;
use sd_registry::TaskRegistry;

#[derive(Default)]
pub struct Calls {
    pub metadata: AtomicUsize,
    pub fetches: Mutex<Vec<(ItemId, Timestep)>>,
    pub resolved: Mutex<Vec<Timestep>>,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Calls {
    pub fn fetches_of(&self, timestep: Timestep) -> usize {
        self.fetches.lock().iter().filter(|(_, s)| *s == timestep).count()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().len()
    }
}

pub struct TestSource {
    pub steps: Vec<Timestep>,
    pub latency: Duration,
    pub calls: Arc<Calls>,
    pub failing: Arc<Mutex<HashSet<Timestep>>>,
    pub panicking_resolves: Mutex<HashSet<Timestep>>,
    pub metadata_failures: AtomicUsize,
}

impl TestSource {
    pub fn new(steps: impl IntoIterator<Item = Timestep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            latency: Duration::from_millis(20),
            calls: Arc::new(Calls::default()),
            failing: Arc::new(Mutex::new(HashSet::new())),
            panicking_resolves: Mutex::new(HashSet::new()),
            metadata_failures: AtomicUsize::new(0),
        }
    }

    pub fn fail_step(&self, timestep: Timestep) {
        self.failing.lock().insert(timestep);
    }

    pub fn heal_step(&self, timestep: Timestep) {
        self.failing.lock().remove(&timestep);
        self.panicking_resolves.lock().remove(&timestep);
    }

    /// Make `resolve_timestep` panic for `timestep` before returning a future.
    pub fn panic_on_resolve(&self, timestep: Timestep) {
        self.panicking_resolves.lock().insert(timestep);
    }
}

impl PlotSource for TestSource {
    type Raw = String;
    type Payload = String;

    fn metadata(&self, _item_id: &ItemId) -> BoxFuture<'static, FetchResult<ItemMetadata>> {
        self.calls.metadata.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .metadata_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let steps = self.steps.clone();
        let latency = self.latency;
        async move {
            tokio::time::sleep(latency).await;
            if fail {
                Err(FetchError::failed("metadata unavailable"))
            } else {
                Ok(ItemMetadata::from_steps(steps))
            }
        }
        .boxed()
    }

    fn fetch_timestep(&self, item_id: &ItemId, timestep: Timestep) -> BoxFuture<'static, FetchResult<String>> {
        self.calls.fetches.lock().push((item_id.clone(), timestep));
        let calls = Arc::clone(&self.calls);
        let fail = self.failing.lock().contains(&timestep);
        let latency = self.latency;
        let item_id = item_id.clone();
        async move {
            let now = calls.active.fetch_add(1, Ordering::SeqCst) + 1;
            calls.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(latency).await;
            calls.active.fetch_sub(1, Ordering::SeqCst);
            if fail {
                Err(FetchError::failed(format!("step {timestep} unavailable")))
            } else {
                Ok(format!("{item_id}:{timestep}"))
            }
        }
        .boxed()
    }

    fn resolve_timestep(&self, raw: String, timestep: Timestep) -> BoxFuture<'static, FetchResult<String>> {
        if self.panicking_resolves.lock().contains(&timestep) {
            panic!("decoder rejected step {timestep}");
        }
        let calls = Arc::clone(&self.calls);
        async move {
            calls.resolved.lock().push(timestep);
            Ok(format!("decoded {raw}"))
        }
        .boxed()
    }
}

pub fn registry(limit: usize) -> TaskRegistry<String> {
    TaskRegistry::new(RegistryConfig::with_limit(limit)).expect("tests run inside a tokio runtime")
}

/// Occupy the registry's only slot until the returned sender fires.
pub fn block_registry(registry: &TaskRegistry<String>) -> tokio::sync::oneshot::Sender<()> {
    let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
    drop(registry.add_task(
        "blocker",
        move || async move {
            let _ = gate_rx.await;
            Ok(String::new())
        },
        0,
    ));
    gate_tx
}

/// Let every in-flight fetch finish under paused time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}
