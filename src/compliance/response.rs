//! Origin response repair.

use chrono::{DateTime, Utc};
use http::header::{
    ALLOW, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, DATE,
    HeaderName, LAST_MODIFIED, WARNING,
};
use http::{Response, StatusCode};

use crate::headers::{fmt_http_date, parse_http_date};

const CONTENT_MD5: HeaderName = HeaderName::from_static("content-md5");

/// Post-processes origin responses to repair protocol deficiencies before
/// cacheability is evaluated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseCompliance;

impl ResponseCompliance {
    pub fn new() -> Self {
        ResponseCompliance
    }

    /// Repairs `response` in place.
    ///
    /// - inserts a `Date` header at `now` when missing or unparseable
    /// - strips entity headers that must not appear on `304`
    /// - drops `Warning` headers whose warn-date disagrees with `Date`
    pub fn ensure<B>(&self, response: &mut Response<B>, now: DateTime<Utc>) {
        self.repair_missing_date(response, now);
        if response.status() == StatusCode::NOT_MODIFIED {
            self.strip_entity_headers(response);
        }
        self.drop_mismatched_warnings(response);
    }

    fn repair_missing_date<B>(&self, response: &mut Response<B>, now: DateTime<Utc>) {
        let valid = response
            .headers()
            .get(DATE)
            .and_then(parse_http_date)
            .is_some();
        if !valid {
            response.headers_mut().insert(DATE, fmt_http_date(now));
        }
    }

    fn strip_entity_headers<B>(&self, response: &mut Response<B>) {
        for name in [
            ALLOW,
            CONTENT_ENCODING,
            CONTENT_LANGUAGE,
            CONTENT_LENGTH,
            CONTENT_MD5,
            CONTENT_RANGE,
            CONTENT_TYPE,
            LAST_MODIFIED,
        ] {
            response.headers_mut().remove(name);
        }
    }

    /// A `Warning` carrying a warn-date different from the response `Date`
    /// was produced for an earlier incarnation of the message.
    fn drop_mismatched_warnings<B>(&self, response: &mut Response<B>) {
        let date = match response.headers().get(DATE).and_then(parse_http_date) {
            Some(date) => date,
            None => return,
        };
        let kept: Vec<_> = response
            .headers()
            .get_all(WARNING)
            .iter()
            .filter(|value| {
                warn_date(value.to_str().unwrap_or_default())
                    .map(|warn| warn == date)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        if kept.len() != response.headers().get_all(WARNING).iter().count() {
            response.headers_mut().remove(WARNING);
            for value in kept {
                response.headers_mut().append(WARNING, value);
            }
        }
    }
}

/// Extracts the optional quoted warn-date from a `Warning` header value.
fn warn_date(value: &str) -> Option<DateTime<Utc>> {
    // warn-code SP warn-agent SP warn-text [SP warn-date]; the date is the
    // trailing quoted block after the quoted text.
    let rest = value.trim_end();
    if !rest.ends_with('"') {
        return None;
    }
    let without_last_quote = &rest[..rest.len() - 1];
    let open = without_last_quote.rfind('"')?;
    let candidate = &without_last_quote[open + 1..];
    let time = httpdate::parse_http_date(candidate).ok()?;
    Some(DateTime::<Utc>::from(time))
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn response_304() -> Response<()> {
        Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(DATE, "Tue, 15 Nov 1994 08:12:31 GMT")
            .header(CONTENT_TYPE, "text/plain")
            .header(CONTENT_LENGTH, "10")
            .header(http::header::ETAG, "\"v1\"")
            .body(())
            .unwrap()
    }

    #[test]
    fn missing_date_is_repaired() {
        let mut response = Response::builder().status(200).body(()).unwrap();
        let now = Utc::now();
        ResponseCompliance::new().ensure(&mut response, now);
        let date = response.headers().get(DATE).and_then(parse_http_date).unwrap();
        assert_eq!(date.timestamp(), now.timestamp());
    }

    #[test]
    fn entity_headers_removed_from_304() {
        let mut response = response_304();
        ResponseCompliance::new().ensure(&mut response, Utc::now());
        assert!(response.headers().get(CONTENT_TYPE).is_none());
        assert!(response.headers().get(CONTENT_LENGTH).is_none());
        assert!(response.headers().get(http::header::ETAG).is_some());
    }

    #[test]
    fn mismatched_warn_date_is_dropped() {
        let mut response = Response::builder()
            .status(200)
            .header(DATE, "Tue, 15 Nov 1994 08:12:31 GMT")
            .header(
                WARNING,
                HeaderValue::from_static(
                    "113 localhost \"Heuristic expiration\" \"Wed, 16 Nov 1994 00:00:00 GMT\"",
                ),
            )
            .body(())
            .unwrap();
        ResponseCompliance::new().ensure(&mut response, Utc::now());
        assert!(response.headers().get(WARNING).is_none());
    }

    #[test]
    fn dateless_warning_is_kept() {
        let mut response = Response::builder()
            .status(200)
            .header(DATE, "Tue, 15 Nov 1994 08:12:31 GMT")
            .header(WARNING, HeaderValue::from_static("110 localhost \"Response is stale\""))
            .body(())
            .unwrap();
        ResponseCompliance::new().ensure(&mut response, Utc::now());
        assert!(response.headers().get(WARNING).is_some());
    }
}
