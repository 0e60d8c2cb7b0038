//! Counters exposed to an external observability collector.
//!
//! The cache and the token manager only ever increment counters through an
//! injected [`MetricsCollector`]. The default, [`RecorderMetrics`], publishes
//! them through the `metrics` facade, so whatever recorder the process
//! installs (Prometheus, OpenTelemetry bridge, ...) receives them. With no
//! recorder installed the increments are dropped.

use metrics::{counter, describe_counter};

pub const CACHE_HIT: &str = "cache.hit";
pub const CACHE_MISS: &str = "cache.miss";
pub const CACHE_SET: &str = "cache.set";
pub const TOKEN_REFRESH: &str = "token.refresh";

/// Sink for the monotonically increasing counters of this crate.
pub trait MetricsCollector: Send + Sync {
    fn increment_cache_hit(&self);
    fn increment_cache_miss(&self);
    fn increment_cache_set(&self);
    fn increment_token_refresh(&self);
}

/// Publishes every increment to the installed `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl MetricsCollector for RecorderMetrics {
    fn increment_cache_hit(&self) {
        counter!(CACHE_HIT).increment(1);
    }

    fn increment_cache_miss(&self) {
        counter!(CACHE_MISS).increment(1);
    }

    fn increment_cache_set(&self) {
        counter!(CACHE_SET).increment(1);
    }

    fn increment_token_refresh(&self) {
        counter!(TOKEN_REFRESH).increment(1);
    }
}

/// Collector that drops every increment, even with a recorder installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn increment_cache_hit(&self) {}
    fn increment_cache_miss(&self) {}
    fn increment_cache_set(&self) {}
    fn increment_token_refresh(&self) {}
}

/// Register descriptions for every counter with the installed recorder.
///
/// Call once after installing the recorder.
pub fn describe_metrics() {
    describe_counter!(CACHE_HIT, "Lookups answered from the schema cache");
    describe_counter!(CACHE_MISS, "Lookups not found in the schema cache");
    describe_counter!(CACHE_SET, "Entries written to the schema cache");
    describe_counter!(TOKEN_REFRESH, "Successful bearer token refreshes");
}
