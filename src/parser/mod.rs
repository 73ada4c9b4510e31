//! Rule document parsing.
//!
//! Rule sets are authored as YAML documents. A [`Driver`] parses one or
//! more documents, compiles their rules (regexes precompiled, phases
//! validated) and buckets them by phase, ready to be merged into a
//! [`RulesSet`](crate::RulesSet). The rendered message of the last parse
//! failure is kept for retrieval through the rule set.
//!
//! ```yaml
//! unicode_codepage: 20127        # optional rule-set property
//! rules:
//!   - id: 100
//!     phase: 3
//!     target: request_body
//!     operator: contains
//!     value: "attack"
//!     action: deny
//!     status: 403
//!   - id: 900
//!     phase: 3
//!     marker: BEGIN_CHECKS       # marker rule: no matcher or action
//! ```

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::registry::{RulesSetPhases, PHASE_COUNT};
use crate::rule::{Rule, RuleAction, RuleMatcher, RuleOperator, RuleTarget};

/// Rule document parse failure.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid rule document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("rule {id}: phase {phase} out of range (valid phases are 0..{})", PHASE_COUNT)]
    PhaseOutOfRange { id: i64, phase: usize },

    #[error("rule {id}: id already defined in this rule set")]
    DuplicateId { id: i64 },

    #[error("rule {id}: {message}")]
    InvalidRule { id: i64, message: String },

    #[error("rule {id}: invalid pattern: {source}")]
    Pattern {
        id: i64,
        #[source]
        source: regex::Error,
    },
}

/// Top-level rule document.
#[derive(Debug, Deserialize)]
pub struct RuleDocument {
    /// Optional Unicode code page applied to the receiving rule set.
    #[serde(default)]
    pub unicode_codepage: Option<i64>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// One rule as authored.
#[derive(Debug, Deserialize)]
pub struct RuleSpec {
    pub id: i64,
    pub phase: usize,
    /// Marker label; when set the rule is a marker and carries no matcher.
    #[serde(default)]
    pub marker: Option<String>,
    #[serde(default)]
    pub target: Option<TargetSpec>,
    #[serde(default)]
    pub operator: Option<OperatorSpec>,
    #[serde(default)]
    pub value: Option<String>,
    /// Defaults to `deny` when omitted.
    #[serde(default)]
    pub action: Option<ActionSpec>,
    /// HTTP status for `deny`; defaults to 403.
    #[serde(default)]
    pub status: Option<u32>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSpec {
    Uri,
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
    ClientIp,
}

impl From<TargetSpec> for RuleTarget {
    fn from(spec: TargetSpec) -> Self {
        match spec {
            TargetSpec::Uri => RuleTarget::Uri,
            TargetSpec::RequestHeaders => RuleTarget::RequestHeaders,
            TargetSpec::RequestBody => RuleTarget::RequestBody,
            TargetSpec::ResponseHeaders => RuleTarget::ResponseHeaders,
            TargetSpec::ResponseBody => RuleTarget::ResponseBody,
            TargetSpec::ClientIp => RuleTarget::ClientIp,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorSpec {
    Contains,
    Equals,
    BeginsWith,
    EndsWith,
    Regex,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSpec {
    Pass,
    Allow,
    Deny,
}

/// Accumulates compiled rules across one or more `parse` calls.
#[derive(Debug, Default)]
pub struct Driver {
    phases: RulesSetPhases,
    unicode_codepage: Option<i64>,
    ids: Vec<i64>,
    error: Option<String>,
}

impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML rule document, compiling and bucketing its rules.
    ///
    /// Returns the number of rules added by this call. Non-marker ids must
    /// be unique across everything this driver has accumulated. On failure
    /// the rendered diagnostic is kept and retrievable via
    /// [`Driver::error`]; rules compiled earlier in the same document may
    /// already have been added.
    pub fn parse(&mut self, text: &str, origin: Option<&str>) -> Result<usize, ParseError> {
        match self.parse_inner(text, origin) {
            Ok(count) => {
                self.error = None;
                Ok(count)
            }
            Err(err) => {
                self.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn parse_inner(&mut self, text: &str, origin: Option<&str>) -> Result<usize, ParseError> {
        let document: RuleDocument = serde_yaml::from_str(text)?;

        if let Some(codepage) = document.unicode_codepage {
            self.unicode_codepage = Some(codepage);
        }

        let mut added = 0;
        for spec in &document.rules {
            let rule = self.compile(spec, origin)?;
            if !rule.is_marker() {
                match self.ids.binary_search(&rule.id()) {
                    Ok(_) => return Err(ParseError::DuplicateId { id: rule.id() }),
                    Err(index) => self.ids.insert(index, rule.id()),
                }
            }
            let inserted = self.phases.insert(Arc::new(rule));
            debug_assert!(inserted, "phase validated before insert");
            added += 1;
        }

        debug!(rules = added, origin = origin.unwrap_or("<inline>"), "parsed rule document");
        Ok(added)
    }

    fn compile(&self, spec: &RuleSpec, origin: Option<&str>) -> Result<Rule, ParseError> {
        if spec.phase >= PHASE_COUNT {
            return Err(ParseError::PhaseOutOfRange {
                id: spec.id,
                phase: spec.phase,
            });
        }

        let rule = if let Some(label) = &spec.marker {
            Rule::marker(spec.id, spec.phase, label)
        } else {
            let target = spec.target.ok_or_else(|| ParseError::InvalidRule {
                id: spec.id,
                message: "target is required".to_string(),
            })?;
            let operator = spec.operator.ok_or_else(|| ParseError::InvalidRule {
                id: spec.id,
                message: "operator is required".to_string(),
            })?;
            let value = spec.value.clone().ok_or_else(|| ParseError::InvalidRule {
                id: spec.id,
                message: "value is required".to_string(),
            })?;

            let operator = match operator {
                OperatorSpec::Contains => RuleOperator::Contains(value),
                OperatorSpec::Equals => RuleOperator::Equals(value),
                OperatorSpec::BeginsWith => RuleOperator::BeginsWith(value),
                OperatorSpec::EndsWith => RuleOperator::EndsWith(value),
                OperatorSpec::Regex => RuleOperator::Regex(
                    regex::Regex::new(&value).map_err(|source| ParseError::Pattern {
                        id: spec.id,
                        source,
                    })?,
                ),
            };

            let action = match spec.action.unwrap_or(ActionSpec::Deny) {
                ActionSpec::Pass => RuleAction::Pass,
                ActionSpec::Allow => RuleAction::Allow,
                ActionSpec::Deny => RuleAction::Deny {
                    status: spec.status.unwrap_or(403),
                },
            };

            Rule::new(
                spec.id,
                spec.phase,
                RuleMatcher {
                    target: target.into(),
                    operator,
                },
                action,
            )
        };

        Ok(match origin {
            Some(origin) => rule.with_origin(origin),
            None => rule,
        })
    }

    /// Rendered diagnostic from the most recent failed parse.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Unicode code page declared by a parsed document, if any.
    pub fn unicode_codepage(&self) -> Option<i64> {
        self.unicode_codepage
    }

    /// The accumulated, phase-bucketed rules.
    pub fn phases(&self) -> &RulesSetPhases {
        &self.phases
    }

    /// Total number of accumulated rules.
    pub fn rule_count(&self) -> usize {
        self.phases.rule_count()
    }
}
