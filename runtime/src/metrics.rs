//! Metric names emitted by the engine and the request manager.
//!
//! Metrics go through the `metrics` facade; nothing is recorded until the
//! application installs a recorder. Call [`describe_metrics`] once after
//! installing it to attach units and descriptions.
//!
//! # Example
//!
//! ```rust
//! use request_lifecycle_runtime::metrics::describe_metrics;
//!
//! // After installing a recorder (Prometheus, statsd, ...)
//! describe_metrics();
//! ```

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

pub use request_lifecycle_core::cache::{CACHE_HITS, CACHE_MISSES, CACHE_WRITES};

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Attempts created by an initiator
pub const ATTEMPTS_STARTED: &str = "request.attempts.started";

/// Attempts that reached a terminal status, labelled by `status`
pub const ATTEMPTS_FINISHED: &str = "request.attempts.finished";

/// Attempts finished early by a listener (cache hits)
pub const ATTEMPTS_SHORT_CIRCUITED: &str = "request.attempts.short_circuited";

/// Wall time from attempt creation to its terminal event
pub const ATTEMPT_DURATION: &str = "request.attempt.duration_seconds";

/// Entries currently held by a manager registry
pub const REGISTRY_SIZE: &str = "request.registry.size";

/// Entries released to honour the concurrency limit
pub const REGISTRY_EVICTIONS: &str = "request.registry.evictions";

/// Register descriptions for every metric above.
pub fn describe_metrics() {
    describe_counter!(ATTEMPTS_STARTED, "Request attempts started");
    describe_counter!(
        ATTEMPTS_FINISHED,
        "Request attempts finished, by terminal status"
    );
    describe_counter!(
        ATTEMPTS_SHORT_CIRCUITED,
        "Request attempts finished early by a listener"
    );
    describe_histogram!(
        ATTEMPT_DURATION,
        Unit::Seconds,
        "Duration of request attempts from init to terminal event"
    );

    describe_counter!(CACHE_HITS, "Cache lookups served from the store");
    describe_counter!(CACHE_MISSES, "Cache lookups that missed");
    describe_counter!(CACHE_WRITES, "Resolved states written to the cache");

    describe_gauge!(REGISTRY_SIZE, "Entries held by a request manager");
    describe_counter!(
        REGISTRY_EVICTIONS,
        "Entries released to honour the concurrency limit"
    );
}
