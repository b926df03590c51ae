//! Stored entry model.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{DATE, ETAG, HeaderMap, HeaderValue, LAST_MODIFIED};
use http::{Method, StatusCode, Uri};

use crate::headers::{CacheControl, parse_http_date};
use crate::key::vary_header_names;

/// Reference-counted handle to a stored response body.
///
/// Cloning a resource shares the underlying bytes; dropping the last clone
/// releases them. Variant entries referencing the same body therefore keep
/// it alive exactly as long as one of them exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource(Arc<Bytes>);

impl Resource {
    /// Wraps a body buffer into a shared resource.
    pub fn new(bytes: Bytes) -> Self {
        Resource(Arc::new(bytes))
    }

    /// The stored body bytes.
    pub fn bytes(&self) -> Bytes {
        self.0.as_ref().clone()
    }

    /// Stored body length in bytes.
    pub fn len(&self) -> u64 {
        self.0.len() as u64
    }

    /// Returns true for an empty body.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A stored HTTP response together with the request identity that produced
/// it and the local timestamps of the exchange.
///
/// Invariant: `request_sent <= response_received`. Header order is
/// preserved as received; the `Date` header, when parseable, is the
/// authoritative origin timestamp for age arithmetic.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub(crate) request_method: Method,
    pub(crate) request_uri: Uri,
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) resource: Resource,
    pub(crate) request_sent: DateTime<Utc>,
    pub(crate) response_received: DateTime<Utc>,
    /// For content-negotiated resources: variant key of this entry.
    pub(crate) variant_key: Option<String>,
    /// On parent entries: variant key to storage key of each known variant.
    pub(crate) variant_map: HashMap<String, String>,
}

impl CacheEntry {
    /// Creates an entry from the parts of an exchange.
    pub fn new(
        request_method: Method,
        request_uri: Uri,
        status: StatusCode,
        headers: HeaderMap,
        resource: Resource,
        request_sent: DateTime<Utc>,
        response_received: DateTime<Utc>,
    ) -> Self {
        debug_assert!(request_sent <= response_received);
        CacheEntry {
            request_method,
            request_uri,
            status,
            headers,
            resource,
            request_sent,
            response_received,
            variant_key: None,
            variant_map: HashMap::new(),
        }
    }

    /// Method of the request that produced this entry.
    pub fn request_method(&self) -> &Method {
        &self.request_method
    }

    /// Effective URI of the request that produced this entry.
    pub fn request_uri(&self) -> &Uri {
        &self.request_uri
    }

    /// Origin status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Stored response headers, in original order.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Handle to the stored body.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Local time the originating request was sent.
    pub fn request_sent(&self) -> DateTime<Utc> {
        self.request_sent
    }

    /// Local time the origin response was received.
    pub fn response_received(&self) -> DateTime<Utc> {
        self.response_received
    }

    /// First value of the named header.
    pub fn first_header(&self, name: http::header::HeaderName) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// Parsed origin `Date` header.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.headers.get(DATE).and_then(parse_http_date)
    }

    /// Entity tag of this entry, if any.
    pub fn etag(&self) -> Option<&HeaderValue> {
        self.headers.get(ETAG)
    }

    /// Parsed `Last-Modified` header.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.headers.get(LAST_MODIFIED).and_then(parse_http_date)
    }

    /// Parsed `Cache-Control` directives of the stored response.
    pub fn cache_control(&self) -> CacheControl {
        CacheControl::from_headers(&self.headers)
    }

    /// Lowercased header names listed in the stored `Vary` headers.
    pub fn vary_names(&self) -> Vec<String> {
        vary_header_names(&self.headers)
    }

    /// True when the stored response carried a `Vary` header.
    pub fn has_vary(&self) -> bool {
        !self.vary_names().is_empty()
    }

    /// True when this is a parent entry with known variants.
    pub fn has_variants(&self) -> bool {
        !self.variant_map.is_empty()
    }

    /// Variant key this entry was stored under, for variant entries.
    pub fn variant_key(&self) -> Option<&str> {
        self.variant_key.as_deref()
    }

    /// Variant key to storage key map of a parent entry.
    pub fn variant_map(&self) -> &HashMap<String, String> {
        &self.variant_map
    }
}
