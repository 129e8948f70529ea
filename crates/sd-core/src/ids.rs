use core::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Index of a simulation time step.
pub type Timestep = i64;

/// Opaque identifier of one unit of work in the task registry.
///
/// Backed by `Arc<str>` so queue keys and map keys share one allocation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Arc<str>);

impl TaskId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Registry id for one step of one item, discriminated by a per-fetcher seed.
    pub fn for_step(seed: u64, item_id: &ItemId, timestep: Timestep) -> Self {
        Self::new(format!("{seed}_{item_id}_{timestep}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// Identity of a data series (one plot item) on the backend.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Arc<str>);

impl ItemId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_task_id_folds_seed_item_and_step() {
        let item = ItemId::new("run-42");
        let id = TaskId::for_step(7, &item, 13);
        assert_eq!(id.as_str(), "7_run-42_13");
    }

    #[test]
    fn different_seeds_do_not_collide() {
        let item = ItemId::new("0");
        assert_ne!(TaskId::for_step(1, &item, 3), TaskId::for_step(2, &item, 3));
    }

    #[test]
    fn item_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&ItemId::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
