//! Cache configuration.

use serde::{Deserialize, Serialize};

/// Default upper bound for stored object bodies, in bytes.
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 8192;

/// Behavior configuration for the caching executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound for caching a response body, in bytes. Larger responses
    /// are handed through uncached.
    pub max_object_size: u64,
    /// Operate as a shared cache: honors `s-maxage` and `proxy-revalidate`
    /// and refuses `private` responses.
    pub shared_cache: bool,
    /// Permit caching of `303 See Other` responses.
    pub caching_303_enabled: bool,
    /// Refuse heuristic caching of HTTP/1.0 responses to requests whose
    /// URI carries a query string.
    pub never_cache_http10_responses_with_query: bool,
    /// Tolerate weak entity tag validators on PUT and DELETE requests by
    /// stripping them instead of rejecting the request.
    pub weak_etag_on_put_delete_allowed: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            shared_cache: true,
            caching_303_enabled: false,
            never_cache_http10_responses_with_query: false,
            weak_etag_on_put_delete_allowed: false,
        }
    }
}

impl CacheConfig {
    /// Starts building a configuration from the defaults.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder {
            config: CacheConfig::default(),
        }
    }
}

/// Builder for [`CacheConfig`].
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Sets the maximum cacheable body size in bytes.
    pub fn max_object_size(mut self, bytes: u64) -> Self {
        self.config.max_object_size = bytes;
        self
    }

    /// Selects shared (`true`) or private (`false`) cache semantics.
    pub fn shared_cache(mut self, shared: bool) -> Self {
        self.config.shared_cache = shared;
        self
    }

    /// Permits caching of 303 responses.
    pub fn caching_303_enabled(mut self, enabled: bool) -> Self {
        self.config.caching_303_enabled = enabled;
        self
    }

    /// Disables heuristic caching of HTTP/1.0 responses with query URIs.
    pub fn never_cache_http10_responses_with_query(mut self, never: bool) -> Self {
        self.config.never_cache_http10_responses_with_query = never;
        self
    }

    /// Tolerates weak entity tags on PUT/DELETE instead of rejecting them.
    pub fn weak_etag_on_put_delete_allowed(mut self, allowed: bool) -> Self {
        self.config.weak_etag_on_put_delete_allowed = allowed;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> CacheConfig {
        self.config
    }
}
