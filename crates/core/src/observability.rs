//! `Logger` and `MetricsSink` seams (spec.md §6).
//!
//! The core never knows about a concrete logging/metrics transport;
//! hosts wire in whatever they use. `emaildb-api` ships a `tracing`
//! default so the crate is useful out of the box.

use std::fmt;

/// Severity of a log line emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Fine-grained diagnostic detail (transaction phases, cache hits).
    Debug,
    /// Normal operational events (key rotation, compaction completed).
    Info,
    /// Recoverable anomalies (a corrupt block found during scan).
    Warn,
    /// Failures that abort the current operation.
    Error,
}

/// A structured log sink.
///
/// Implementations must never be handed key material, plaintext email
/// bodies, or IVs/auth tags — callers pass only ids, counts, and
/// algorithm names.
pub trait Logger: Send + Sync {
    /// Emit one log line at the given level.
    fn log(&self, level: LogLevel, target: &str, message: &dyn fmt::Display);
}

/// A metrics sink for simple counters and timings.
pub trait MetricsSink: Send + Sync {
    /// Increment a named counter by `value`.
    fn counter(&self, name: &str, value: u64);
    /// Record an observation (e.g. a duration in microseconds) for a
    /// named histogram-like metric.
    fn observe(&self, name: &str, value: f64);
}

/// A [`Logger`] that discards everything. Used as a default when the
/// host does not supply one and `tracing` is unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: LogLevel, _target: &str, _message: &dyn fmt::Display) {}
}

/// A [`MetricsSink`] that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn counter(&self, _name: &str, _value: u64) {}
    fn observe(&self, _name: &str, _value: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_implementations_do_not_panic() {
        let logger = NoopLogger;
        logger.log(LogLevel::Warn, "test", &"hello");
        let metrics = NoopMetricsSink;
        metrics.counter("x", 1);
        metrics.observe("y", 1.0);
    }
}
