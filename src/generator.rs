//! Client response materialization from stored entries.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{
    AGE, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_LOCATION, DATE, ETAG, EXPIRES, HeaderValue,
    TRANSFER_ENCODING, VARY,
};
use http::{Method, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::BufferedBody;
use crate::entry::CacheEntry;
use crate::error::RequestViolation;
use crate::headers::MAX_AGE_SECS;
use crate::policy::ValidityPolicy;
use crate::request::RequestHead;

/// Builds the responses the cache hands to clients.
#[derive(Debug, Clone, Copy)]
pub struct ResponseGenerator {
    validity: ValidityPolicy,
}

impl ResponseGenerator {
    pub fn new(validity: ValidityPolicy) -> Self {
        ResponseGenerator { validity }
    }

    /// A full response materialized from `entry`, with a computed `Age`
    /// header. HEAD exchanges carry no body.
    pub fn response<B>(
        &self,
        request: &RequestHead,
        entry: &CacheEntry,
        now: DateTime<Utc>,
    ) -> Response<BufferedBody<B>>
    where
        B: HttpBody,
    {
        let body = if request.method == Method::HEAD {
            BufferedBody::empty()
        } else {
            BufferedBody::complete(entry.resource().bytes())
        };

        let mut response = Response::new(body);
        *response.status_mut() = entry.status();
        *response.headers_mut() = entry.headers().clone();

        let age = self.validity.age_secs(entry, now).min(MAX_AGE_SECS);
        if age > 0 {
            response
                .headers_mut()
                .insert(AGE, HeaderValue::from_str(&age.to_string()).expect("decimal"));
        }

        if !entry.headers().contains_key(TRANSFER_ENCODING) {
            response.headers_mut().insert(
                CONTENT_LENGTH,
                HeaderValue::from_str(&entry.resource().len().to_string()).expect("decimal"),
            );
        }

        response
    }

    /// A `304 Not Modified` synthesized from `entry`, carrying only the
    /// headers permitted on 304.
    pub fn not_modified<B>(&self, entry: &CacheEntry) -> Response<BufferedBody<B>>
    where
        B: HttpBody,
    {
        let mut response = Response::new(BufferedBody::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        for name in [DATE, ETAG, CONTENT_LOCATION, EXPIRES, CACHE_CONTROL, VARY] {
            for value in entry.headers().get_all(&name) {
                response.headers_mut().append(name.clone(), value.clone());
            }
        }
        response
    }

    /// The cache's own answer to a fatally noncompliant request.
    pub fn error_for_request<B>(&self, violation: RequestViolation) -> Response<BufferedBody<B>>
    where
        B: HttpBody,
    {
        let (status, message) = match violation {
            RequestViolation::BodyWithoutLength => (
                StatusCode::LENGTH_REQUIRED,
                "Request body requires a Content-Length or Transfer-Encoding",
            ),
            RequestViolation::WeakEtagOnUnsafeMethod => (
                StatusCode::BAD_REQUEST,
                "Weak entity tag validators are not allowed on PUT or DELETE",
            ),
        };
        let mut response =
            Response::new(BufferedBody::complete(Bytes::from_static(message.as_bytes())));
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use http::header::{CONTENT_TYPE, HeaderMap};
    use http::{Request, Uri};
    use http_body_util::Full;

    use crate::entry::Resource;
    use crate::headers::fmt_http_date;

    use super::*;

    type TestBody = Full<Bytes>;

    fn generator() -> ResponseGenerator {
        ResponseGenerator::new(ValidityPolicy::new(true))
    }

    fn entry(origin: DateTime<Utc>, extra: &[(&str, &str)]) -> CacheEntry {
        let mut headers = HeaderMap::new();
        headers.insert(DATE, fmt_http_date(origin));
        for (name, value) in extra {
            headers.insert(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        CacheEntry::new(
            Method::GET,
            Uri::from_static("http://example.com/x"),
            StatusCode::OK,
            headers,
            Resource::new(Bytes::from_static(b"stored body")),
            origin,
            origin,
        )
    }

    fn get_head(method: Method) -> RequestHead {
        RequestHead::of(
            &Request::builder()
                .method(method)
                .uri("http://example.com/x")
                .body(())
                .unwrap(),
        )
    }

    #[test]
    fn response_carries_age_and_content_length() {
        let origin = Utc::now();
        let entry = entry(origin, &[(CONTENT_TYPE.as_str(), "text/plain")]);
        let response: Response<BufferedBody<TestBody>> =
            generator().response(&get_head(Method::GET), &entry, origin + Duration::seconds(42));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(AGE).unwrap(), "42");
        assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "11");
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[test]
    fn zero_age_omits_the_header() {
        let origin = Utc::now();
        let entry = entry(origin, &[]);
        let response: Response<BufferedBody<TestBody>> =
            generator().response(&get_head(Method::GET), &entry, origin);
        assert!(response.headers().get(AGE).is_none());
    }

    #[test]
    fn head_request_gets_no_body() {
        use http_body::Body;
        let origin = Utc::now();
        let entry = entry(origin, &[]);
        let response: Response<BufferedBody<TestBody>> =
            generator().response(&get_head(Method::HEAD), &entry, origin);
        assert!(response.body().is_end_stream());
    }

    #[test]
    fn not_modified_carries_only_permitted_headers() {
        let origin = Utc::now();
        let entry = entry(
            origin,
            &[
                (ETAG.as_str(), "\"v1\""),
                (CACHE_CONTROL.as_str(), "max-age=60"),
                (CONTENT_TYPE.as_str(), "text/plain"),
            ],
        );
        let response: Response<BufferedBody<TestBody>> = generator().not_modified(&entry);
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers().get(ETAG).unwrap(), "\"v1\"");
        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "max-age=60");
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn violations_map_to_statuses() {
        let g = generator();
        let r: Response<BufferedBody<TestBody>> =
            g.error_for_request(RequestViolation::BodyWithoutLength);
        assert_eq!(r.status(), StatusCode::LENGTH_REQUIRED);
        let r: Response<BufferedBody<TestBody>> =
            g.error_for_request(RequestViolation::WeakEtagOnUnsafeMethod);
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
    }
}
