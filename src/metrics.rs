//! Metrics recording for cache observability.

use crate::context::CacheResponseStatus;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of cache hit events.
    pub static ref CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "http_cache_hit_count",
            "Total number of requests answered from the cache."
        );
        "http_cache_hit_count"
    };
    /// Track number of cache miss events.
    pub static ref CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "http_cache_miss_count",
            "Total number of requests forwarded to the origin."
        );
        "http_cache_miss_count"
    };
    /// Track number of successful revalidations.
    pub static ref CACHE_UPDATE_COUNTER: &'static str = {
        metrics::describe_counter!(
            "http_cache_update_count",
            "Total number of stale entries refreshed against the origin."
        );
        "http_cache_update_count"
    };
    /// Track number of responses generated by the cache itself.
    pub static ref CACHE_MODULE_RESPONSE_COUNTER: &'static str = {
        metrics::describe_counter!(
            "http_cache_module_response_count",
            "Total number of responses the cache produced on its own behalf."
        );
        "http_cache_module_response_count"
    };
    /// Track number of storage failures degraded to passthrough.
    pub static ref CACHE_FAILURE_COUNTER: &'static str = {
        metrics::describe_counter!(
            "http_cache_failure_count",
            "Total number of executions degraded by storage read failures."
        );
        "http_cache_failure_count"
    };
}

/// Records the outcome of one execution.
#[cfg(feature = "metrics")]
pub(crate) fn record_response_status(status: CacheResponseStatus) {
    let counter = match status {
        CacheResponseStatus::CacheHit => *CACHE_HIT_COUNTER,
        CacheResponseStatus::CacheMiss => *CACHE_MISS_COUNTER,
        CacheResponseStatus::Validated => *CACHE_UPDATE_COUNTER,
        CacheResponseStatus::CacheModuleResponse => *CACHE_MODULE_RESPONSE_COUNTER,
        CacheResponseStatus::Failure => *CACHE_FAILURE_COUNTER,
    };
    metrics::counter!(counter).increment(1);
}

/// Records the outcome of one execution.
#[cfg(not(feature = "metrics"))]
pub(crate) fn record_response_status(_status: CacheResponseStatus) {}
