//! Dashboard panels sharing one registry.
//!
//! Each panel is bound to one item at a time. Rebinding a panel to another
//! item discards its fetcher without tearing down in-flight tasks; the new
//! fetcher gets a fresh seed so its task ids cannot alias the old ones.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use sd_core::{FetchResult, FetcherConfig, ItemId, ItemMetadata, Timestep};
use sd_registry::TaskRegistry;

use crate::fetcher::{PlotFetcher, StepFuture};
use crate::source::PlotSource;

pub struct PanelGroup<S: PlotSource> {
    source: Arc<S>,
    registry: TaskRegistry<S::Raw>,
    config: FetcherConfig,
    panels: BTreeMap<String, PlotFetcher<S>>,
}

impl<S: PlotSource> PanelGroup<S> {
    pub fn new(source: Arc<S>, registry: TaskRegistry<S::Raw>, config: FetcherConfig) -> Self {
        Self {
            source,
            registry,
            config,
            panels: BTreeMap::new(),
        }
    }

    /// Show `item_id` in `panel`, reusing the fetcher if the item is unchanged.
    pub fn bind(&mut self, panel: impl Into<String>, item_id: ItemId) -> PlotFetcher<S> {
        let panel = panel.into();
        if let Some(existing) = self.panels.get(&panel)
            && existing.item_id() == &item_id
        {
            return existing.clone();
        }

        tracing::debug!(panel = %panel, item_id = %item_id, "binding panel");
        let fetcher = PlotFetcher::new(
            item_id,
            Arc::clone(&self.source),
            self.registry.clone(),
            self.config.clone(),
        );
        self.panels.insert(panel, fetcher.clone());
        fetcher
    }

    pub fn unbind(&mut self, panel: &str) -> Option<PlotFetcher<S>> {
        self.panels.remove(panel)
    }

    pub fn fetcher(&self, panel: &str) -> Option<&PlotFetcher<S>> {
        self.panels.get(panel)
    }

    /// Bound panels and their items, ordered by panel name.
    pub fn panels(&self) -> impl Iterator<Item = (&str, &ItemId)> {
        self.panels
            .iter()
            .map(|(panel, fetcher)| (panel.as_str(), fetcher.item_id()))
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    pub fn registry(&self) -> &TaskRegistry<S::Raw> {
        &self.registry
    }

    /// Initialize every bound fetcher concurrently.
    pub async fn initialize_all(&self) -> Vec<(String, FetchResult<Arc<ItemMetadata>>)> {
        let pending: Vec<_> = self
            .panels
            .iter()
            .map(|(panel, fetcher)| {
                let init = fetcher.initialize();
                let panel = panel.clone();
                async move { (panel, init.await) }
            })
            .collect();
        join_all(pending).await
    }

    /// Move every initialized panel to `timestep`.
    ///
    /// Returns the panels that were skipped because they are not initialized.
    pub fn set_current_timestep(&self, timestep: Timestep, prefetch: bool) -> Vec<String> {
        let mut skipped = Vec::new();
        for (panel, fetcher) in &self.panels {
            if fetcher.set_current_timestep(timestep, prefetch).is_err() {
                skipped.push(panel.clone());
            }
        }
        if !skipped.is_empty() {
            tracing::debug!(?skipped, timestep, "skipped uninitialized panels");
        }
        skipped
    }

    /// Step futures for `timestep` from every initialized panel.
    pub fn get_timestep_plots(&self, timestep: Timestep) -> Vec<(String, StepFuture<S::Payload>)> {
        self.panels
            .iter()
            .filter_map(|(panel, fetcher)| {
                fetcher
                    .get_timestep_plot(timestep)
                    .ok()
                    .map(|step| (panel.clone(), step))
            })
            .collect()
    }

    /// Smallest step available in any initialized panel.
    pub fn min_available_timestep(&self) -> Option<Timestep> {
        self.panels
            .values()
            .filter_map(|fetcher| fetcher.available_timesteps().first().copied())
            .min()
    }

    /// Raise `timestep` to the smallest available step, if it lies below it.
    pub fn clamp_timestep(&self, timestep: Timestep) -> Timestep {
        match self.min_available_timestep() {
            Some(min) => timestep.max(min),
            None => timestep,
        }
    }
}
