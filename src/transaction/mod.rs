//! Per-request transaction state for rule evaluation.
//!
//! A [`Transaction`] carries everything a rule matcher can inspect about
//! one request/response exchange, plus the evaluation trail: which rules
//! matched and whether a disruptive action intervened.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::rule::RuleTarget;

/// State of one inbound request/response exchange under inspection.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Request method.
    pub method: String,
    /// Request URI (path and query).
    pub uri: String,
    /// Request headers.
    pub request_headers: HashMap<String, String>,
    /// Decoded request body.
    pub request_body: String,
    /// Response headers.
    pub response_headers: HashMap<String, String>,
    /// Decoded response body.
    pub response_body: String,
    /// Client IP address, when known.
    pub client_ip: Option<IpAddr>,
    /// Timestamp when the transaction was opened.
    pub timestamp: DateTime<Utc>,
    matched: Vec<i64>,
    intervention: Option<Intervention>,
}

impl Transaction {
    /// Create a new transaction for a request.
    pub fn new(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            request_headers: HashMap::new(),
            request_body: String::new(),
            response_headers: HashMap::new(),
            response_body: String::new(),
            client_ip: None,
            timestamp: Utc::now(),
            matched: Vec::new(),
            intervention: None,
        }
    }

    /// Add a request header.
    pub fn with_request_header(mut self, name: &str, value: &str) -> Self {
        self.request_headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Set the request body.
    pub fn with_request_body(mut self, body: &str) -> Self {
        self.request_body = body.to_string();
        self
    }

    /// Add a response header.
    pub fn with_response_header(mut self, name: &str, value: &str) -> Self {
        self.response_headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Set the response body.
    pub fn with_response_body(mut self, body: &str) -> Self {
        self.response_body = body.to_string();
        self
    }

    /// Set the client IP.
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Get the text a matcher inspects for a given target.
    ///
    /// Header targets are flattened to one `name: value` line per header.
    pub fn target_value(&self, target: RuleTarget) -> String {
        match target {
            RuleTarget::Uri => self.uri.clone(),
            RuleTarget::RequestHeaders => Self::flatten_headers(&self.request_headers),
            RuleTarget::RequestBody => self.request_body.clone(),
            RuleTarget::ResponseHeaders => Self::flatten_headers(&self.response_headers),
            RuleTarget::ResponseBody => self.response_body.clone(),
            RuleTarget::ClientIp => self
                .client_ip
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
        }
    }

    fn flatten_headers(headers: &HashMap<String, String>) -> String {
        let mut lines: Vec<String> = headers
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// Record a matched rule id.
    pub fn record_match(&mut self, rule_id: i64) {
        self.matched.push(rule_id);
    }

    /// Ids of the rules that matched so far, in evaluation order.
    pub fn matched_rules(&self) -> &[i64] {
        &self.matched
    }

    /// Record a disruptive intervention. The first intervention wins.
    pub fn intervene(&mut self, intervention: Intervention) {
        if self.intervention.is_none() {
            self.intervention = Some(intervention);
        }
    }

    /// The recorded intervention, if any rule disrupted this transaction.
    pub fn intervention(&self) -> Option<&Intervention> {
        self.intervention.as_ref()
    }

    /// Whether a disruptive action has intervened.
    pub fn is_disrupted(&self) -> bool {
        self.intervention.is_some()
    }
}

/// Disruption recorded by a denying rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intervention {
    /// HTTP status the engine should answer with.
    pub status: u32,
    /// Id of the rule that intervened.
    pub rule_id: i64,
    /// Human-readable reason for the log.
    pub log: Option<String>,
}

/// Outcome of dispatching one phase against a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStatus {
    /// Processing may proceed to the next phase.
    Continue,
    /// A disruptive action short-circuited the phase.
    Disrupted,
}

impl EvaluationStatus {
    /// Whether the engine should keep processing further phases.
    pub fn should_continue(&self) -> bool {
        matches!(self, EvaluationStatus::Continue)
    }
}
