//! Request-side cacheability: is this request a candidate for lookup at all.

use http::header::PRAGMA;
use http::{Method, Request};

use crate::headers::CacheControl;

/// Decides whether a request may be answered from the cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestCacheability;

impl RequestCacheability {
    pub fn new() -> Self {
        RequestCacheability
    }

    /// True when the request may be served from storage: a GET or HEAD
    /// without `no-store`/`no-cache` and without `Pragma: no-cache`.
    pub fn is_servable_from_cache<B>(&self, request: &Request<B>) -> bool {
        if request.method() != Method::GET && request.method() != Method::HEAD {
            return false;
        }

        let cc = CacheControl::from_headers(request.headers());
        if cc.no_store || cc.no_cache {
            return false;
        }

        let pragma_no_cache = request
            .headers()
            .get_all(PRAGMA)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("no-cache"));
        !pragma_no_cache
    }
}

#[cfg(test)]
mod tests {
    use http::header::CACHE_CONTROL;

    use super::*;

    fn request(method: Method, headers: &[(&str, &str)]) -> Request<()> {
        let mut builder = Request::builder().method(method).uri("http://example.com/x");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn plain_get_and_head_are_servable() {
        let policy = RequestCacheability::new();
        assert!(policy.is_servable_from_cache(&request(Method::GET, &[])));
        assert!(policy.is_servable_from_cache(&request(Method::HEAD, &[])));
    }

    #[test]
    fn unsafe_methods_are_not_servable() {
        let policy = RequestCacheability::new();
        for method in [Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS] {
            assert!(!policy.is_servable_from_cache(&request(method, &[])));
        }
    }

    #[test]
    fn cache_control_directives_disable_lookup() {
        let policy = RequestCacheability::new();
        assert!(!policy.is_servable_from_cache(&request(
            Method::GET,
            &[(CACHE_CONTROL.as_str(), "no-store")]
        )));
        assert!(!policy.is_servable_from_cache(&request(
            Method::GET,
            &[(CACHE_CONTROL.as_str(), "no-cache")]
        )));
    }

    #[test]
    fn pragma_no_cache_disables_lookup() {
        let policy = RequestCacheability::new();
        assert!(!policy.is_servable_from_cache(&request(Method::GET, &[("pragma", "no-cache")])));
    }
}
