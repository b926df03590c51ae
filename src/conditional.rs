//! Conditional revalidation request construction.

use http::header::{
    CACHE_CONTROL, DATE, HeaderValue, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE,
    IF_UNMODIFIED_SINCE, LAST_MODIFIED,
};
use http::Request;
use http_body::Body as HttpBody;

use crate::body::BufferedBody;
use crate::entry::CacheEntry;
use crate::request::RequestHead;
use crate::storage::Variant;

/// Builds the requests the cache sends to the origin when revalidating.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionalRequestBuilder;

impl ConditionalRequestBuilder {
    pub fn new() -> Self {
        ConditionalRequestBuilder
    }

    /// A conditional request derived from the client's original request and
    /// the stored entry's validators.
    ///
    /// Adds `If-None-Match` with the entry's entity tag and/or
    /// `If-Modified-Since` with the entry's `Last-Modified` (falling back
    /// to its `Date`).
    pub fn build_conditional<B>(
        &self,
        original: &RequestHead,
        entry: &CacheEntry,
    ) -> Request<BufferedBody<B>>
    where
        B: HttpBody,
    {
        let mut head = original.clone();
        head.headers.remove(IF_NONE_MATCH);
        head.headers.remove(IF_MODIFIED_SINCE);

        if let Some(etag) = entry.etag() {
            head.headers.insert(IF_NONE_MATCH, etag.clone());
        }
        let validator_date = entry
            .first_header(LAST_MODIFIED)
            .or_else(|| entry.first_header(DATE));
        if let Some(date) = validator_date {
            head.headers.insert(IF_MODIFIED_SINCE, date.clone());
        }

        head.into_request()
    }

    /// A conditional request carrying every known variant's entity tag in a
    /// single `If-None-Match` list.
    pub fn build_conditional_from_variants<B>(
        &self,
        original: &RequestHead,
        variants: &[Variant],
    ) -> Request<BufferedBody<B>>
    where
        B: HttpBody,
    {
        let mut head = original.clone();
        head.headers.remove(IF_NONE_MATCH);
        head.headers.remove(IF_MODIFIED_SINCE);

        let tags: Vec<&str> = variants
            .iter()
            .filter_map(|variant| variant.entry.etag())
            .filter_map(|value| value.to_str().ok())
            .collect();
        if let Ok(value) = HeaderValue::from_str(&tags.join(", ")) {
            head.headers.insert(IF_NONE_MATCH, value);
        }

        head.into_request()
    }

    /// An unconditional retry request: the original with validator
    /// preconditions and `max-age=0` directives stripped.
    pub fn build_unconditional<B>(&self, original: &RequestHead) -> Request<BufferedBody<B>>
    where
        B: HttpBody,
    {
        let mut head = original.clone();
        for name in [
            IF_NONE_MATCH,
            IF_MODIFIED_SINCE,
            IF_MATCH,
            IF_UNMODIFIED_SINCE,
            IF_RANGE,
        ] {
            head.headers.remove(name);
        }

        let kept: Vec<HeaderValue> = head
            .headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|value| {
                let text = value.to_str().ok()?;
                let directives: Vec<&str> = text
                    .split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("max-age=0"))
                    .collect();
                if directives.is_empty() {
                    None
                } else {
                    HeaderValue::from_str(&directives.join(", ")).ok()
                }
            })
            .collect();
        head.headers.remove(CACHE_CONTROL);
        for value in kept {
            head.headers.append(CACHE_CONTROL, value);
        }

        head.into_request()
    }
}
