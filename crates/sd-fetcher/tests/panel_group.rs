//! Panels bound to items, sharing one registry.

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use sd_core::{FetcherConfig, ItemId};
use sd_fetcher::PanelGroup;
use support::{TestSource, registry, settle};

fn group(source: &Arc<TestSource>, limit: usize) -> PanelGroup<TestSource> {
    PanelGroup::new(Arc::clone(source), registry(limit), FetcherConfig::default())
}

#[tokio::test(start_paused = true)]
async fn binding_the_same_item_keeps_the_fetcher() {
    let source = Arc::new(TestSource::new(0..4));
    let mut panels = group(&source, 4);

    let first = panels.bind("left", ItemId::new("a"));
    let again = panels.bind("left", ItemId::new("a"));
    assert_eq!(first.seed(), again.seed());

    let rebound = panels.bind("left", ItemId::new("b"));
    assert_eq!(rebound.item_id(), &ItemId::new("b"));
    assert_eq!(panels.len(), 1);
    assert!(!rebound.is_initialized());

    panels.bind("right", ItemId::new("a"));
    let bound: Vec<_> = panels
        .panels()
        .map(|(panel, item)| (panel.to_string(), item.to_string()))
        .collect();
    assert_eq!(
        bound,
        [("left".to_string(), "b".to_string()), ("right".to_string(), "a".to_string())]
    );

    assert!(panels.unbind("left").is_some());
    assert!(panels.fetcher("left").is_none());
}

#[tokio::test(start_paused = true)]
async fn uninitialized_panels_are_skipped() {
    let source = Arc::new(TestSource::new(0..8));
    let mut panels = group(&source, 4);
    let left = panels.bind("left", ItemId::new("a"));
    panels.bind("right", ItemId::new("b"));

    left.initialize().await.unwrap();
    let skipped = panels.set_current_timestep(2, true);
    assert_eq!(skipped, ["right"]);
    assert_eq!(left.tracked_timesteps(), vec![2, 3, 4, 5]);

    let plots = panels.get_timestep_plots(2);
    assert_eq!(plots.len(), 1);
    assert_eq!(plots[0].0, "left");
}

#[tokio::test(start_paused = true)]
async fn initialize_all_reports_each_panel() {
    let source = Arc::new(TestSource::new([3, 5, 9]));
    source.metadata_failures.store(1, Ordering::SeqCst);
    let mut panels = group(&source, 4);
    panels.bind("left", ItemId::new("a"));
    panels.bind("right", ItemId::new("b"));

    let results = panels.initialize_all().await;
    assert_eq!(results.len(), 2);
    assert_eq!(results.iter().filter(|(_, r)| r.is_err()).count(), 1);

    // Failed metadata is reissued on the next round.
    let results = panels.initialize_all().await;
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(source.calls.metadata.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn timestep_is_clamped_to_earliest_available() {
    let source = Arc::new(TestSource::new([4, 6, 8]));
    let mut panels = group(&source, 4);
    assert_eq!(panels.clamp_timestep(1), 1);

    panels.bind("left", ItemId::new("a"));
    panels.initialize_all().await;
    assert_eq!(panels.min_available_timestep(), Some(4));
    assert_eq!(panels.clamp_timestep(1), 4);
    assert_eq!(panels.clamp_timestep(6), 6);
}

#[tokio::test(start_paused = true)]
async fn panels_share_one_budget() {
    let source = Arc::new(TestSource::new(0..10));
    let mut panels = group(&source, 2);
    for (panel, item) in [("a", "x"), ("b", "y"), ("c", "z")] {
        panels.bind(panel, ItemId::new(item));
    }
    panels.initialize_all().await;

    assert!(panels.set_current_timestep(0, true).is_empty());
    assert_eq!(panels.registry().running_count(), 2);
    settle().await;

    assert_eq!(source.calls.fetch_count(), 12);
    assert_eq!(source.calls.peak.load(Ordering::SeqCst), 2);
}
