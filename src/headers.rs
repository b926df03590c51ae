//! `Cache-Control` parsing, entity tag comparison, and HTTP-date handling.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use http::header::{CACHE_CONTROL, HeaderMap, HeaderValue};

/// Maximum age value, mirroring the 2^31 cap used for `Age` headers.
pub const MAX_AGE_SECS: u64 = 2_147_483_648;

/// Parsed `Cache-Control` directives from one or more header values.
///
/// Unknown directives are ignored; malformed numeric values leave the
/// directive unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
    pub no_cache: bool,
    pub no_store: bool,
    pub private: bool,
    pub public: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    pub only_if_cached: bool,
    pub stale_while_revalidate: Option<u64>,
    pub stale_if_error: Option<u64>,
    /// `max-stale` may appear without a value, meaning any staleness is
    /// acceptable. `Some(None)` records the valueless form.
    pub max_stale: Option<Option<u64>>,
    pub min_fresh: Option<u64>,
}

impl CacheControl {
    /// Parses a single `Cache-Control` header value.
    pub fn parse(value: &str) -> Self {
        let mut cc = Self::default();
        cc.merge(value);
        cc
    }

    /// Parses every `Cache-Control` header in `headers` into one directive set.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cc = Self::default();
        for value in headers.get_all(CACHE_CONTROL) {
            if let Ok(text) = value.to_str() {
                cc.merge(text);
            }
        }
        cc
    }

    fn merge(&mut self, value: &str) {
        for directive in value.split(',') {
            let directive = directive.trim();
            let (name, arg) = match directive.split_once('=') {
                Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "no-cache" => self.no_cache = true,
                "no-store" => self.no_store = true,
                "private" => self.private = true,
                "public" => self.public = true,
                "must-revalidate" => self.must_revalidate = true,
                "proxy-revalidate" => self.proxy_revalidate = true,
                "only-if-cached" => self.only_if_cached = true,
                "max-age" => self.max_age = arg.and_then(|v| v.parse().ok()),
                "s-maxage" => self.s_maxage = arg.and_then(|v| v.parse().ok()),
                "stale-while-revalidate" => {
                    self.stale_while_revalidate = arg.and_then(|v| v.parse().ok());
                }
                "stale-if-error" => self.stale_if_error = arg.and_then(|v| v.parse().ok()),
                "max-stale" => self.max_stale = Some(arg.and_then(|v| v.parse().ok())),
                "min-fresh" => self.min_fresh = arg.and_then(|v| v.parse().ok()),
                _ => {}
            }
        }
    }
}

/// Parses an HTTP-date header value into a UTC timestamp.
///
/// Returns `None` when the value is not a valid IMF-fixdate, RFC 850 date,
/// or asctime date.
pub fn parse_http_date(value: &HeaderValue) -> Option<DateTime<Utc>> {
    let text = value.to_str().ok()?;
    let time = httpdate::parse_http_date(text).ok()?;
    Some(DateTime::<Utc>::from(time))
}

/// Formats a UTC timestamp as an IMF-fixdate header value.
pub fn fmt_http_date(date: DateTime<Utc>) -> HeaderValue {
    let formatted = httpdate::fmt_http_date(SystemTime::from(date));
    HeaderValue::from_str(&formatted).expect("IMF-fixdate is always a valid header value")
}

/// The value of a parseable `Content-Length` header.
pub fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(http::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Returns true when `tag` is a weak entity tag (`W/"..."`).
pub fn is_weak_etag(tag: &str) -> bool {
    tag.starts_with("W/") || tag.starts_with("w/")
}

fn opaque_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix("W/").or_else(|| tag.strip_prefix("w/")).unwrap_or(tag)
}

/// Weak entity tag comparison: the opaque tags must match, weakness ignored.
///
/// This is the comparison `If-None-Match` evaluation uses.
pub fn etag_matches_weak(a: &str, b: &str) -> bool {
    opaque_tag(a) == opaque_tag(b)
}

/// Strong entity tag comparison: both tags must be strong and identical.
pub fn etag_matches_strong(a: &str, b: &str) -> bool {
    !is_weak_etag(a.trim()) && !is_weak_etag(b.trim()) && a.trim() == b.trim()
}

/// Splits a comma-separated entity tag list (`If-None-Match` syntax) into
/// individual tags.
pub fn split_etag_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|tag| !tag.is_empty())
}
