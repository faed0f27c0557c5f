//! Default `tracing`-backed [`Logger`]/[`MetricsSink`] wired in by
//! [`crate::Engine::open`] when a host supplies none (spec.md §4.13).
//!
//! Grounded on the engine's own direct `tracing::{debug,info,warn,
//! error}!` usage (e.g. `coordinator.rs`, `database.rs`) — this crate
//! keeps the rest of the workspace decoupled from `tracing` through the
//! `Logger`/`MetricsSink` traits, then bridges to it once, here, at the
//! facade boundary.

use emaildb_core::{LogLevel, Logger, MetricsSink};
use std::fmt;

/// Emits every [`Logger::log`] call through the matching `tracing`
/// macro, with `target` forwarded as the tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, target: &str, message: &dyn fmt::Display) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "emaildb", component = target, "{message}"),
            LogLevel::Info => tracing::info!(target: "emaildb", component = target, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "emaildb", component = target, "{message}"),
            LogLevel::Error => tracing::error!(target: "emaildb", component = target, "{message}"),
        }
    }
}

/// Emits every counter/observation as a `tracing` event at `debug`,
/// tagged so a host's subscriber can filter or aggregate them. A
/// production deployment wanting real metrics wiring supplies its own
/// `MetricsSink` instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn counter(&self, name: &str, value: u64) {
        tracing::debug!(target: "emaildb::metrics", counter = name, value, "counter");
    }

    fn observe(&self, name: &str, value: f64) {
        tracing::debug!(target: "emaildb::metrics", histogram = name, value, "observation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_logger_does_not_panic_at_any_level() {
        let logger = TracingLogger;
        logger.log(LogLevel::Debug, "test", &"a");
        logger.log(LogLevel::Info, "test", &"b");
        logger.log(LogLevel::Warn, "test", &"c");
        logger.log(LogLevel::Error, "test", &"d");
    }

    #[test]
    fn tracing_metrics_sink_does_not_panic() {
        let metrics = TracingMetricsSink;
        metrics.counter("x", 1);
        metrics.observe("y", 1.0);
    }
}
