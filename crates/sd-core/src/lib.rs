//! sd-core: shared foundation for the simdash fetch scheduler.
//!
//! Contains:
//! - ids (task and item identifiers, time steps)
//! - priority (scheduling priorities and the step priority rule)
//! - status (registry and per-step task state machines)
//! - metadata (item metadata reported by the backend)
//! - config (registry/fetcher configuration, YAML loading)
//! - error (shared error types)

pub mod config;
pub mod error;
pub mod ids;
pub mod metadata;
pub mod priority;
pub mod status;

// Re-exports: nice ergonomics for downstream crates
pub use config::{FetcherConfig, RegistryConfig, SchedulerConfig};
pub use error::{ConfigError, ConfigResult, FetchError, FetchResult};
pub use ids::*;
pub use metadata::ItemMetadata;
pub use priority::*;
pub use status::{StepStatus, TaskStatus};
