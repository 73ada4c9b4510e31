//! Compiled inspection rules.
//!
//! A [`Rule`] pairs an immutable identity (id, phase, optional marker
//! label) with a matcher compiled at parse time and the action to take on
//! a match. Rules are shared by reference across rule sets: a base set and
//! every set that merged it hold the same [`SharedRule`], and the rule is
//! released when the last holder drops its handle.

use std::sync::Arc;

use regex::Regex;
use tracing::trace;

use crate::transaction::{Intervention, Transaction};

/// Shared ownership handle for a rule held by one or more rule sets.
pub type SharedRule = Arc<Rule>;

/// Part of the transaction a matcher inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    Uri,
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
    ClientIp,
}

/// Match operator, compiled at parse time.
#[derive(Debug, Clone)]
pub enum RuleOperator {
    Contains(String),
    Equals(String),
    BeginsWith(String),
    EndsWith(String),
    Regex(Regex),
}

/// Compiled matcher: where to look and what to look for.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    pub target: RuleTarget,
    pub operator: RuleOperator,
}

impl RuleMatcher {
    /// Check the matcher against a transaction.
    pub fn matches(&self, tx: &Transaction) -> bool {
        let value = tx.target_value(self.target);
        match &self.operator {
            RuleOperator::Contains(needle) => value.contains(needle),
            RuleOperator::Equals(expected) => value == *expected,
            RuleOperator::BeginsWith(prefix) => value.starts_with(prefix),
            RuleOperator::EndsWith(suffix) => value.ends_with(suffix),
            RuleOperator::Regex(pattern) => pattern.is_match(&value),
        }
    }
}

/// Action taken when a rule matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// Record the match and keep evaluating the phase.
    Pass,
    /// Stop evaluating the current phase without disrupting.
    Allow,
    /// Disrupt the transaction with an HTTP status.
    Deny { status: u32 },
}

impl Default for RuleAction {
    fn default() -> Self {
        Self::Deny { status: 403 }
    }
}

/// Result of evaluating one rule against a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The matcher did not match.
    NoMatch,
    /// Matched; phase evaluation continues.
    Matched,
    /// Matched with an allow action; the rest of the phase is skipped.
    Allowed,
    /// Matched with a disruptive action; an intervention was recorded.
    Disrupted,
}

/// A single inspection directive.
///
/// Identity is immutable after construction. Marker rules carry an id and
/// a phase but no matcher or action; they anchor positions in a rule set
/// and are exempt from duplicate-id enforcement.
#[derive(Debug)]
pub struct Rule {
    id: i64,
    phase: usize,
    marker: Option<String>,
    matcher: Option<RuleMatcher>,
    action: RuleAction,
    origin: Option<String>,
}

impl Rule {
    /// Create a matching rule.
    pub fn new(id: i64, phase: usize, matcher: RuleMatcher, action: RuleAction) -> Self {
        Self {
            id,
            phase,
            marker: None,
            matcher: Some(matcher),
            action,
            origin: None,
        }
    }

    /// Create a marker rule.
    pub fn marker(id: i64, phase: usize, label: &str) -> Self {
        Self {
            id,
            phase,
            marker: Some(label.to_string()),
            matcher: None,
            action: RuleAction::Pass,
            origin: None,
        }
    }

    /// Record where the rule was loaded from (file path, URI or label).
    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = Some(origin.to_string());
        self
    }

    /// Rule id, unique among non-marker rules within a composed set.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Processing phase the rule belongs to.
    pub fn phase(&self) -> usize {
        self.phase
    }

    /// Whether this is a marker rule.
    pub fn is_marker(&self) -> bool {
        self.marker.is_some()
    }

    /// Marker label, when this is a marker rule.
    pub fn marker_label(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// Origin the rule was loaded from, when known.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Evaluate the rule against a transaction.
    ///
    /// Marker rules never match. On a match the rule id is recorded on the
    /// transaction; a deny action additionally records an intervention.
    pub fn evaluate(&self, tx: &mut Transaction) -> RuleOutcome {
        let Some(matcher) = &self.matcher else {
            return RuleOutcome::NoMatch;
        };
        if !matcher.matches(tx) {
            return RuleOutcome::NoMatch;
        }

        tx.record_match(self.id);
        trace!(rule_id = self.id, phase = self.phase, "rule matched");

        match self.action {
            RuleAction::Pass => RuleOutcome::Matched,
            RuleAction::Allow => RuleOutcome::Allowed,
            RuleAction::Deny { status } => {
                tx.intervene(Intervention {
                    status,
                    rule_id: self.id,
                    log: Some(format!("rule {} denied {} {}", self.id, tx.method, tx.uri)),
                });
                RuleOutcome::Disrupted
            }
        }
    }
}
