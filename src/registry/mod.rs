//! Phase-indexed rule registry.
//!
//! [`RulesSetPhases`] is the phase-bucketed store with merge-time identity
//! enforcement; [`RulesSet`] is the externally-visible aggregate that
//! loads, merges, evaluates and dumps rules.

mod phases;
mod set;

pub use phases::{phase, MergeError, RulesSetPhases, PHASE_COUNT};
pub use set::{RulesError, RulesSet};
