//! Phase-bucketed, reference-shared rule storage.
//!
//! One bucket per processing phase, insertion-ordered; evaluation order
//! within a phase equals insertion order, and after a merge previously
//! resident rules precede newly merged ones.

use std::io::{self, Write};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::rule::SharedRule;

/// Number of processing phases a rule can belong to.
pub const PHASE_COUNT: usize = 8;

/// Well-known processing phase indices.
pub mod phase {
    pub const CONNECTION: usize = 0;
    pub const URI: usize = 1;
    pub const REQUEST_HEADERS: usize = 2;
    pub const REQUEST_BODY: usize = 3;
    pub const RESPONSE_HEADERS: usize = 4;
    pub const RESPONSE_BODY: usize = 5;
    pub const LOGGING: usize = 6;
}

/// Merge failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    /// A non-marker rule in the source collides with a non-marker id
    /// already present in the destination.
    #[error("Rule id: {0} is duplicated")]
    DuplicatedId(i64),
}

/// Fixed array of insertion-ordered rule buckets, one per phase.
#[derive(Debug)]
pub struct RulesSetPhases {
    buckets: [Vec<SharedRule>; PHASE_COUNT],
}

impl Default for RulesSetPhases {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| Vec::new()),
        }
    }
}

impl RulesSetPhases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `rule` to the bucket matching its own phase.
    ///
    /// The caller transfers its ownership share; no additional share is
    /// taken here. Returns false and mutates nothing when the rule's phase
    /// is out of range; that failure carries no diagnostic.
    pub fn insert(&mut self, rule: SharedRule) -> bool {
        let phase = rule.phase();
        if phase >= PHASE_COUNT {
            return false;
        }
        self.buckets[phase].push(rule);
        true
    }

    /// Merge every rule from `source` into `self`, taking a new ownership
    /// share per merged rule. Returns the number of rules merged.
    ///
    /// Duplicate detection runs against a snapshot of the non-marker ids
    /// present in `self` before the merge; rules appended by this same
    /// call are not checked against each other. Marker rules in the source
    /// are exempt and always mergeable.
    ///
    /// Not transactional: when a duplicate aborts the merge, rules from
    /// buckets processed earlier in phase order remain appended.
    pub fn append(&mut self, source: &RulesSetPhases) -> Result<usize, MergeError> {
        let mut ids: Vec<i64> = Vec::new();
        for bucket in &self.buckets {
            ids.extend(
                bucket
                    .iter()
                    .filter(|rule| !rule.is_marker())
                    .map(|rule| rule.id()),
            );
        }
        ids.sort_unstable();

        let mut merged = 0;
        for (phase, bucket) in source.buckets.iter().enumerate() {
            for rule in bucket {
                if !rule.is_marker() && ids.binary_search(&rule.id()).is_ok() {
                    debug!(rule_id = rule.id(), phase, "merge aborted on duplicate id");
                    return Err(MergeError::DuplicatedId(rule.id()));
                }
                merged += 1;
                self.buckets[phase].push(Arc::clone(rule));
            }
        }

        Ok(merged)
    }

    /// Write a diagnostic listing: one line per phase with its rule count,
    /// then one line per held rule id.
    pub fn dump_to(&self, out: &mut dyn Write) -> io::Result<()> {
        for (phase, bucket) in self.buckets.iter().enumerate() {
            writeln!(out, "Phase: {} ({} rules)", phase, bucket.len())?;
            for rule in bucket {
                writeln!(out, "    Rule ID: {}", rule.id())?;
            }
        }
        Ok(())
    }

    /// The bucket for a phase, or `None` when the phase is out of range.
    pub fn at(&self, phase: usize) -> Option<&[SharedRule]> {
        self.buckets.get(phase).map(Vec::as_slice)
    }

    /// Total number of rules across all phases.
    pub fn rule_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }
}
