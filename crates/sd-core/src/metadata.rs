//! Item metadata reported by the backend.

use serde::{Deserialize, Serialize};

use crate::ids::Timestep;

/// What the backend knows about one item before any step is fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Available time steps, in whatever order the backend reports them.
    pub steps: Vec<Timestep>,
    /// Simulation time of each entry of `steps`, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<Vec<f64>>,
}

impl ItemMetadata {
    pub fn from_steps(steps: impl IntoIterator<Item = Timestep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            times: None,
        }
    }

    /// Steps in ascending numeric order with duplicates removed.
    pub fn sorted_steps(&self) -> Vec<Timestep> {
        let mut steps = self.steps.clone();
        steps.sort_unstable();
        steps.dedup();
        steps
    }

    /// Simulation time reported for `timestep`, if any.
    pub fn time_of(&self, timestep: Timestep) -> Option<f64> {
        let times = self.times.as_ref()?;
        let idx = self.steps.iter().position(|&s| s == timestep)?;
        times.get(idx).copied()
    }
}
