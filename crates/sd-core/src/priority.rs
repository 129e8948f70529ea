//! Scheduling priorities.
//!
//! Lower values are scheduled sooner. Steps behind the viewer are pushed to
//! the back of the queue with [`DEFERRED_PRIORITY`] rather than dropped.

use crate::ids::Timestep;

/// Scheduling priority of a registry task. Lower runs sooner.
pub type Priority = u64;

/// Priority assigned to steps behind the reference step.
pub const DEFERRED_PRIORITY: Priority = Priority::MAX;

/// Priority of fetching `timestep` while the viewer sits at `reference`.
///
/// Forward steps get their distance from `reference`; backward steps get
/// [`DEFERRED_PRIORITY`].
pub fn step_priority(timestep: Timestep, reference: Timestep) -> Priority {
    if timestep < reference {
        DEFERRED_PRIORITY
    } else {
        timestep.abs_diff(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn forward_steps_use_distance() {
        assert_eq!(step_priority(7, 5), 2);
        assert_eq!(step_priority(8, 5), 3);
        assert_eq!(step_priority(5, 5), 0);
    }

    #[test]
    fn past_steps_are_deferred() {
        assert_eq!(step_priority(2, 5), DEFERRED_PRIORITY);
        assert_eq!(step_priority(3, 5), DEFERRED_PRIORITY);
    }

    #[test]
    fn extreme_steps_do_not_overflow() {
        assert_eq!(step_priority(i64::MAX, i64::MIN), u64::MAX);
        assert_eq!(step_priority(i64::MIN, i64::MAX), DEFERRED_PRIORITY);
    }

    proptest! {
        #[test]
        fn nearer_forward_steps_are_never_later(
            reference in -1000_i64..1000,
            a in 0_i64..500,
            b in 0_i64..500,
        ) {
            let (near, far) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(step_priority(reference + near, reference) <= step_priority(reference + far, reference));
        }

        #[test]
        fn backward_steps_sort_after_forward_steps(
            reference in -1000_i64..1000,
            back in 1_i64..500,
            forward in 0_i64..500,
        ) {
            prop_assert!(step_priority(reference - back, reference) > step_priority(reference + forward, reference));
        }
    }
}
