//! Response-side cacheability: is this origin response storable.

use http::header::{AUTHORIZATION, DATE, EXPIRES, RANGE};
use http::{Response, StatusCode, Version};
use tracing::debug;

use crate::headers::{CacheControl, declared_content_length, parse_http_date};
use crate::key::vary_header_names;
use crate::request::RequestHead;

/// Decides whether an origin response may be written to storage.
#[derive(Debug, Clone, Copy)]
pub struct ResponseCacheability {
    max_object_size: u64,
    shared: bool,
    never_cache_http10_with_query: bool,
    caching_303_enabled: bool,
}

impl ResponseCacheability {
    pub fn new(
        max_object_size: u64,
        shared: bool,
        never_cache_http10_with_query: bool,
        caching_303_enabled: bool,
    ) -> Self {
        ResponseCacheability {
            max_object_size,
            shared,
            never_cache_http10_with_query,
            caching_303_enabled,
        }
    }

    /// True when the exchange `request` → `response` is storable.
    pub fn is_storable<B>(&self, request: &RequestHead, response: &Response<B>) -> bool {
        if request.method != http::Method::GET && request.method != http::Method::HEAD {
            return false;
        }
        // Range requests are not implemented by this cache; their
        // responses must never be reused for plain requests.
        if request.headers.contains_key(RANGE) {
            return false;
        }

        let request_cc = CacheControl::from_headers(&request.headers);
        if request_cc.no_store {
            return false;
        }

        let mut storable_by_default = match response.status() {
            StatusCode::OK
            | StatusCode::NON_AUTHORITATIVE_INFORMATION
            | StatusCode::MULTIPLE_CHOICES
            | StatusCode::MOVED_PERMANENTLY
            | StatusCode::GONE => true,
            StatusCode::PARTIAL_CONTENT => return false,
            StatusCode::SEE_OTHER => {
                if !self.caching_303_enabled {
                    return false;
                }
                true
            }
            StatusCode::TEMPORARY_REDIRECT => return false,
            _ => false,
        };

        if self.never_cache_http10_with_query
            && response.version() == Version::HTTP_10
            && request.uri.query().is_some()
        {
            debug!("HTTP/1.0 response to query URI is not heuristically cacheable");
            storable_by_default = false;
        }

        let response_cc = CacheControl::from_headers(response.headers());
        if response_cc.no_store {
            return false;
        }
        if self.shared && response_cc.private {
            return false;
        }

        let vary = vary_header_names(response.headers());
        if vary.iter().any(|name| name == "*") {
            debug!("Vary: * response is not cacheable");
            return false;
        }

        if let Some(length) = declared_content_length(response.headers()) {
            if length > self.max_object_size {
                return false;
            }
        }

        if self.shared && request.headers.contains_key(AUTHORIZATION) {
            let permitted = response_cc.s_maxage.is_some()
                || response_cc.must_revalidate
                || response_cc.public;
            if !permitted {
                return false;
            }
        }

        // Age arithmetic is meaningless without an origin timestamp;
        // compliance repair inserts one before this check runs.
        if response.headers().get(DATE).and_then(parse_http_date).is_none() {
            return false;
        }

        let explicitly_storable = response_cc.max_age.is_some()
            || response_cc.s_maxage.is_some()
            || response_cc.public
            || response_cc.must_revalidate
            || response_cc.proxy_revalidate
            || response.headers().contains_key(EXPIRES);

        storable_by_default || explicitly_storable
    }
}
