//! Incoming request normalization and fatal violation detection.

use http::header::{
    CACHE_CONTROL, CONTENT_LENGTH, HeaderValue, IF_MATCH, IF_RANGE, TRANSFER_ENCODING,
};
use http::{Method, Request, Version};
use http_body::Body as HttpBody;

use crate::error::RequestViolation;
use crate::headers::is_weak_etag;

/// Normalizes incoming requests and flags the ones the cache must answer
/// itself instead of forwarding.
#[derive(Debug, Clone, Copy)]
pub struct RequestCompliance {
    weak_etag_on_put_delete_allowed: bool,
}

impl RequestCompliance {
    pub fn new(weak_etag_on_put_delete_allowed: bool) -> Self {
        RequestCompliance {
            weak_etag_on_put_delete_allowed,
        }
    }

    /// Returns the fatal protocol violations carried by `request`, in the
    /// order they were detected.
    pub fn fatal_violations<B>(&self, request: &Request<B>) -> Vec<RequestViolation>
    where
        B: HttpBody,
    {
        let mut violations = Vec::new();

        let declares_length = request.headers().contains_key(CONTENT_LENGTH)
            || request.headers().contains_key(TRANSFER_ENCODING);
        if !request.body().is_end_stream() && !declares_length {
            violations.push(RequestViolation::BodyWithoutLength);
        }

        if !self.weak_etag_on_put_delete_allowed
            && is_put_or_delete(request.method())
            && has_weak_validator(request)
        {
            violations.push(RequestViolation::WeakEtagOnUnsafeMethod);
        }

        violations
    }

    /// Rewrites `request` in place into its HTTP/1.1-compliant form.
    ///
    /// Upgrades the protocol version, drops freshness directives that
    /// conflict with `no-cache`, and strips tolerated weak validators from
    /// PUT/DELETE requests.
    pub fn normalize<B>(&self, request: &mut Request<B>) {
        if request.version() < Version::HTTP_11 {
            *request.version_mut() = Version::HTTP_11;
        }

        self.strip_freshness_directives_with_no_cache(request);

        if self.weak_etag_on_put_delete_allowed && is_put_or_delete(request.method()) {
            remove_weak_validators(request);
        }
    }

    /// `no-cache` demands an end-to-end reload; the other freshness
    /// directives would contradict it and are dropped.
    fn strip_freshness_directives_with_no_cache<B>(&self, request: &mut Request<B>) {
        let values: Vec<String> = request
            .headers()
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_owned))
            .collect();
        let has_no_cache = values.iter().any(|v| {
            v.split(',')
                .any(|d| d.trim().eq_ignore_ascii_case("no-cache"))
        });
        if !has_no_cache {
            return;
        }

        let mut kept = Vec::new();
        for value in &values {
            let directives: Vec<&str> = value
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .filter(|d| {
                    let name = d.split('=').next().unwrap_or(d).trim().to_ascii_lowercase();
                    !matches!(name.as_str(), "min-fresh" | "max-stale" | "max-age")
                })
                .collect();
            if !directives.is_empty() {
                kept.push(directives.join(", "));
            }
        }

        request.headers_mut().remove(CACHE_CONTROL);
        for value in kept {
            if let Ok(value) = HeaderValue::from_str(&value) {
                request.headers_mut().append(CACHE_CONTROL, value);
            }
        }
    }
}

fn is_put_or_delete(method: &Method) -> bool {
    *method == Method::PUT || *method == Method::DELETE
}

fn has_weak_validator<B>(request: &Request<B>) -> bool {
    for name in [IF_MATCH, IF_RANGE] {
        for value in request.headers().get_all(name) {
            if let Ok(text) = value.to_str() {
                if text.split(',').any(|tag| is_weak_etag(tag.trim())) {
                    return true;
                }
            }
        }
    }
    false
}

fn remove_weak_validators<B>(request: &mut Request<B>) {
    for name in [IF_MATCH, IF_RANGE] {
        let kept: Vec<HeaderValue> = request
            .headers()
            .get_all(&name)
            .iter()
            .filter_map(|value| {
                let text = value.to_str().ok()?;
                let strong: Vec<&str> = text
                    .split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty() && !is_weak_etag(tag))
                    .collect();
                if strong.is_empty() {
                    None
                } else {
                    HeaderValue::from_str(&strong.join(", ")).ok()
                }
            })
            .collect();
        request.headers_mut().remove(&name);
        for value in kept {
            request.headers_mut().append(&name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http_body_util::{Empty, Full};

    use crate::body::BufferedBody;

    use super::*;

    type TestBody = BufferedBody<Full<Bytes>>;

    fn get_request() -> Request<TestBody> {
        Request::builder()
            .method(Method::GET)
            .uri("http://example.com/x")
            .body(BufferedBody::empty())
            .unwrap()
    }

    #[test]
    fn bodyless_get_has_no_violations() {
        let compliance = RequestCompliance::new(false);
        assert!(compliance.fatal_violations(&get_request()).is_empty());
    }

    #[test]
    fn body_without_length_is_fatal() {
        let compliance = RequestCompliance::new(false);
        let request: Request<BufferedBody<Empty<Bytes>>> = Request::builder()
            .method(Method::PUT)
            .uri("http://example.com/x")
            .body(BufferedBody::complete(Bytes::from_static(b"payload")))
            .unwrap();
        assert_eq!(
            compliance.fatal_violations(&request),
            vec![RequestViolation::BodyWithoutLength]
        );
    }

    #[test]
    fn weak_etag_on_put_is_fatal_unless_allowed() {
        let request: Request<TestBody> = Request::builder()
            .method(Method::PUT)
            .uri("http://example.com/x")
            .header(CONTENT_LENGTH, "3")
            .header(IF_MATCH, "W/\"v1\"")
            .body(BufferedBody::complete(Bytes::from_static(b"abc")))
            .unwrap();
        assert_eq!(
            RequestCompliance::new(false).fatal_violations(&request),
            vec![RequestViolation::WeakEtagOnUnsafeMethod]
        );
        assert!(RequestCompliance::new(true).fatal_violations(&request).is_empty());
    }

    #[test]
    fn normalize_upgrades_protocol_version() {
        let mut request = get_request();
        *request.version_mut() = Version::HTTP_10;
        RequestCompliance::new(false).normalize(&mut request);
        assert_eq!(request.version(), Version::HTTP_11);
    }

    #[test]
    fn normalize_drops_freshness_directives_alongside_no_cache() {
        let mut request = get_request();
        request.headers_mut().insert(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache, max-age=30, min-fresh=5"),
        );
        RequestCompliance::new(false).normalize(&mut request);
        let value = request.headers().get(CACHE_CONTROL).unwrap();
        assert_eq!(value, "no-cache");
    }

    #[test]
    fn normalize_strips_tolerated_weak_validators() {
        let mut request: Request<TestBody> = Request::builder()
            .method(Method::DELETE)
            .uri("http://example.com/x")
            .header(IF_MATCH, "W/\"v1\", \"v2\"")
            .body(BufferedBody::empty())
            .unwrap();
        RequestCompliance::new(true).normalize(&mut request);
        assert_eq!(request.headers().get(IF_MATCH).unwrap(), "\"v2\"");
    }
}
