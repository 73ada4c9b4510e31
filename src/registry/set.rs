//! Externally-visible rule set aggregate.
//!
//! A [`RulesSet`] wraps one [`RulesSetPhases`], carries engine-wide
//! properties (Unicode code page, debug-log sink, an advisory self
//! reference count) and exposes the load/merge/evaluate/dump surface.
//!
//! Mutating operations take `&mut self`; evaluation takes `&self` and is
//! safe to run concurrently with other evaluations, but callers must
//! externally serialize loads and merges against any concurrent use.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use thiserror::Error;
use tracing::{debug, warn};

use super::phases::{MergeError, RulesSetPhases};
use crate::debuglog::{DebugSink, TracingSink};
use crate::loader::{self, LoadError};
use crate::parser::{Driver, ParseError};
use crate::rule::RuleOutcome;
use crate::transaction::{EvaluationStatus, Transaction};

/// Failure of a rule-set operation.
#[derive(Debug, Error)]
pub enum RulesError {
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// A composed, phase-indexed set of inspection rules.
pub struct RulesSet {
    phases: RulesSetPhases,
    unicode_codepage: i64,
    markers_skipped: AtomicU64,
    reference_count: AtomicUsize,
    debug_log: Box<dyn DebugSink>,
    parser_error: Option<String>,
}

impl Default for RulesSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RulesSet {
    /// Create an empty rule set logging through [`TracingSink`].
    pub fn new() -> Self {
        Self::with_logger(Box::new(TracingSink::default()))
    }

    /// Create an empty rule set with a caller-supplied debug-log sink.
    pub fn with_logger(sink: Box<dyn DebugSink>) -> Self {
        Self {
            phases: RulesSetPhases::new(),
            unicode_codepage: 0,
            markers_skipped: AtomicU64::new(0),
            reference_count: AtomicUsize::new(0),
            debug_log: sink,
            parser_error: None,
        }
    }

    /// Note one more external context pointing at this set.
    pub fn increment_reference_count(&self) {
        self.reference_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Note one external context letting go of this set. Returns the new
    /// count. Advisory only: reaching zero does not destroy the set; the
    /// owning caller remains responsible for dropping it.
    pub fn decrement_reference_count(&self) -> usize {
        let prev = self
            .reference_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    /// Current advisory reference count.
    pub fn reference_count(&self) -> usize {
        self.reference_count.load(Ordering::Relaxed)
    }

    /// Parse a rule document and add its rules to this set.
    ///
    /// Returns the number of rules added. Added rules are subject to the
    /// same duplicate-id enforcement as a merge; on a parse failure the
    /// diagnostic is retrievable via [`RulesSet::parser_error`].
    pub fn load(&mut self, text: &str) -> Result<usize, RulesError> {
        self.load_inner(text, None)
    }

    /// Like [`RulesSet::load`], recording `origin` on every loaded rule.
    pub fn load_with_origin(&mut self, text: &str, origin: &str) -> Result<usize, RulesError> {
        self.load_inner(text, Some(origin))
    }

    /// Load a rule document from a local path, or from an HTTP(S) URI when
    /// the argument carries a scheme.
    pub fn load_from_uri(&mut self, uri: &str) -> Result<usize, RulesError> {
        let text = loader::load_uri(uri)?;
        self.load_inner(&text, Some(uri))
    }

    /// Fetch a rule document from a remote server, authenticating with
    /// `key`, and add its rules to this set.
    pub fn load_remote(&mut self, key: &str, uri: &str) -> Result<usize, RulesError> {
        let text = loader::fetch_remote(key, uri)?;
        self.load_inner(&text, Some(uri))
    }

    fn load_inner(&mut self, text: &str, origin: Option<&str>) -> Result<usize, RulesError> {
        let mut driver = Driver::new();
        if let Err(err) = driver.parse(text, origin) {
            self.parser_error = Some(err.to_string());
            return Err(err.into());
        }
        self.parser_error = None;
        self.merge_driver(&driver)
    }

    /// Merge the rules accumulated in a parser driver into this set.
    pub fn merge_driver(&mut self, driver: &Driver) -> Result<usize, RulesError> {
        if let Some(codepage) = driver.unicode_codepage() {
            self.unicode_codepage = codepage;
        }
        let merged = self.phases.append(driver.phases())?;
        debug!(rules = merged, "merged rules from driver");
        Ok(merged)
    }

    /// Merge every rule from another set into this one, establishing
    /// shared ownership of each merged rule.
    ///
    /// Same contract as [`RulesSetPhases::append`], including its
    /// non-transactional failure behavior.
    pub fn merge(&mut self, other: &RulesSet) -> Result<usize, RulesError> {
        let merged = self.phases.append(&other.phases)?;
        debug!(rules = merged, "merged rule sets");
        Ok(merged)
    }

    /// Evaluate one phase's rules against a transaction, in insertion
    /// order. Marker rules are skipped (and counted). Stops early when a
    /// rule allows the rest of the phase or disrupts the transaction.
    ///
    /// An out-of-range phase evaluates nothing and continues.
    pub fn evaluate(&self, phase: usize, tx: &mut Transaction) -> EvaluationStatus {
        let Some(bucket) = self.phases.at(phase) else {
            warn!(phase, "evaluation requested for out-of-range phase");
            return EvaluationStatus::Continue;
        };

        for rule in bucket {
            if rule.is_marker() {
                self.markers_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            match rule.evaluate(tx) {
                RuleOutcome::NoMatch => {}
                RuleOutcome::Matched => {
                    self.debug(
                        4,
                        &rule.id().to_string(),
                        rule.origin().unwrap_or(""),
                        "rule matched",
                    );
                }
                RuleOutcome::Allowed => {
                    self.debug(
                        4,
                        &rule.id().to_string(),
                        rule.origin().unwrap_or(""),
                        "rule allowed, skipping remainder of phase",
                    );
                    break;
                }
                RuleOutcome::Disrupted => {
                    self.debug(
                        2,
                        &rule.id().to_string(),
                        rule.origin().unwrap_or(""),
                        "rule disrupted transaction",
                    );
                    return EvaluationStatus::Disrupted;
                }
            }
        }

        EvaluationStatus::Continue
    }

    /// Write the diagnostic listing for this set.
    pub fn dump_to(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "Rule set: {} rules (unicode codepage {})",
            self.phases.rule_count(),
            self.unicode_codepage
        )?;
        self.phases.dump_to(out)
    }

    /// Print the diagnostic listing to stdout.
    pub fn dump(&self) -> io::Result<()> {
        self.dump_to(&mut io::stdout().lock())
    }

    /// Route a structured diagnostic to the configured log sink.
    pub fn debug(&self, level: u8, id: &str, uri: &str, message: &str) {
        self.debug_log.log(level, id, uri, message);
    }

    /// Diagnostic from the most recent failed load, if any.
    pub fn parser_error(&self) -> Option<&str> {
        self.parser_error.as_deref()
    }

    /// The phase-bucketed storage backing this set.
    pub fn phases(&self) -> &RulesSetPhases {
        &self.phases
    }

    /// Total number of rules held across all phases.
    pub fn rule_count(&self) -> usize {
        self.phases.rule_count()
    }

    /// Unicode code page applied to rule transformations.
    pub fn unicode_codepage(&self) -> i64 {
        self.unicode_codepage
    }

    pub fn set_unicode_codepage(&mut self, codepage: i64) {
        self.unicode_codepage = codepage;
    }

    /// Number of marker rules skipped during evaluation so far.
    pub fn markers_skipped(&self) -> u64 {
        self.markers_skipped.load(Ordering::Relaxed)
    }
}
