//! Phase-indexed rule registry for a request-inspection firewall.
//!
//! The registry stores compiled inspection rules bucketed by processing
//! phase, composes rule sets from multiple sources (inline text, local
//! files, key-authenticated remote fetch, set-to-set merge) while sharing
//! individual rules by reference across sets, and dispatches phase-scoped
//! evaluation against an inbound transaction.
//!
//! Rules are authored as YAML documents and compiled once at load time;
//! a loaded rule is held behind a shared handle so that a base set and
//! every set that merged it reference the same object. Merging enforces
//! rule-id uniqueness for non-marker rules against the destination's
//! pre-merge contents.
//!
//! # Example
//!
//! ```
//! use wafcore::{phase, EvaluationStatus, RulesSet, Transaction};
//!
//! let doc = r#"
//! rules:
//!   - id: 100
//!     phase: 3
//!     target: request_body
//!     operator: contains
//!     value: "attack"
//!     action: deny
//!     status: 403
//! "#;
//!
//! let mut set = RulesSet::new();
//! set.load(doc).unwrap();
//!
//! let mut tx = Transaction::new("POST", "/login").with_request_body("attack payload");
//! let status = set.evaluate(phase::REQUEST_BODY, &mut tx);
//! assert_eq!(status, EvaluationStatus::Disrupted);
//! assert_eq!(tx.intervention().unwrap().status, 403);
//! ```
//!
//! # Concurrency
//!
//! The registry is synchronous and not internally synchronized beyond its
//! counters. Concurrent [`RulesSet::evaluate`] calls are safe with each
//! other; callers must externally serialize `load`/`merge`/destruction
//! against any concurrent use of the same set.

pub mod capi;
pub mod debuglog;
pub mod loader;
pub mod parser;
pub mod registry;
pub mod rule;
pub mod transaction;

pub use debuglog::{DebugSink, NoopSink, TracingSink};
pub use loader::LoadError;
pub use parser::{Driver, ParseError};
pub use registry::{phase, MergeError, RulesError, RulesSet, RulesSetPhases, PHASE_COUNT};
pub use rule::{Rule, RuleAction, RuleMatcher, RuleOperator, RuleOutcome, RuleTarget, SharedRule};
pub use transaction::{EvaluationStatus, Intervention, Transaction};
