//! Debug-log sinks for registry diagnostics.
//!
//! The registry routes structured diagnostics (level, rule id, origin
//! URI, message) through a pluggable sink. The default sink forwards to
//! `tracing`; a no-op sink is a valid configuration for embedders that
//! discard engine diagnostics.

use tracing::{debug, info, trace, warn};

/// Receiver for registry diagnostics.
pub trait DebugSink: Send + Sync {
    /// Route one diagnostic. `level` follows the engine convention:
    /// lower is more severe, 9 is the most verbose.
    fn log(&self, level: u8, id: &str, uri: &str, message: &str);
}

/// Sink forwarding diagnostics to `tracing`.
#[derive(Debug)]
pub struct TracingSink {
    /// Highest level emitted; diagnostics above it are dropped.
    level: u8,
}

impl TracingSink {
    pub fn with_level(level: u8) -> Self {
        Self { level }
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self { level: 9 }
    }
}

impl DebugSink for TracingSink {
    fn log(&self, level: u8, id: &str, uri: &str, message: &str) {
        if level > self.level {
            return;
        }
        match level {
            0..=2 => warn!(rule_id = %id, uri = %uri, "{}", message),
            3..=4 => info!(rule_id = %id, uri = %uri, "{}", message),
            5..=6 => debug!(rule_id = %id, uri = %uri, "{}", message),
            _ => trace!(rule_id = %id, uri = %uri, "{}", message),
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NoopSink;

impl DebugSink for NoopSink {
    fn log(&self, _level: u8, _id: &str, _uri: &str, _message: &str) {}
}
