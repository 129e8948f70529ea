//! sd-fetcher: per-panel time-step fetch scheduling.
//!
//! A [`PlotFetcher`] turns "the viewer is at step N of item X" into
//! prioritized, deduplicated registry tasks with look-ahead prefetching.
//! A [`PanelGroup`] keeps one fetcher per dashboard panel over a shared
//! registry.

pub mod fetcher;
pub mod panels;
pub mod source;

pub use fetcher::{MetadataFuture, PlotFetcher, StepFuture};
pub use panels::PanelGroup;
pub use source::{FnSource, PlotSource};
