//! Cache identity: targets, fingerprints, and variant keys.
//!
//! A fingerprint names a cacheable request: target authority, effective
//! request URI, and method. Variant entries of a content-negotiated
//! resource are stored under the fingerprint prefixed with a variant key
//! derived from the varying request header values.

use std::fmt;

use http::header::VARY;
use http::{HeaderMap, Method, Uri};

/// The origin a request is routed to: scheme, host, and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    scheme: String,
    host: String,
    port: u16,
}

impl Target {
    /// Creates a target from explicit components.
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Target {
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Derives the target from an absolute request URI.
    ///
    /// Returns `None` for relative URIs without an authority. The port
    /// defaults to 80 for `http` and 443 for `https`.
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let scheme = uri.scheme_str().unwrap_or("http");
        let host = uri.host()?;
        let port = uri.port_u16().unwrap_or(match scheme {
            "https" => 443,
            _ => 80,
        });
        Some(Target::new(scheme, host, port))
    }

    /// Scheme component, lowercased.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host component, lowercased.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port component.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Canonical storage key for a request: `METHOD scheme://host:port/path?query`.
pub fn cache_key(target: &Target, method: &Method, uri: &Uri) -> String {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    format!("{method} {target}{path}")
}

/// Computes the variant key for a request against a `Vary` header set.
///
/// Header names are lowercased and sorted so the key is canonical for a
/// given set of varying values; a header absent from the request
/// contributes an empty value. Separator characters occurring inside
/// header values are escaped to keep the key unambiguous.
pub fn variant_key(vary: &[String], request_headers: &HeaderMap) -> String {
    let mut names: Vec<String> = vary.iter().map(|name| name.to_ascii_lowercase()).collect();
    names.sort();
    names.dedup();

    let mut out = String::from("{");
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        let values: Vec<&str> = request_headers
            .get_all(name.as_str())
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        out.push_str(name);
        out.push('=');
        out.push_str(&escape_value(&values.join(", ")));
    }
    out.push('}');
    out
}

/// Storage key of a variant entry: the variant key prepended to the root key.
pub fn variant_cache_key(variant_key: &str, root_key: &str) -> String {
    format!("{variant_key}{root_key}")
}

/// Parses the header names listed in the `Vary` headers of a response.
///
/// Returns an empty list when no `Vary` header is present. A `Vary: *`
/// contributes the literal `*` entry, which cacheability checks reject.
pub fn vary_header_names(headers: &HeaderMap) -> Vec<String> {
    let mut names = Vec::new();
    for value in headers.get_all(VARY) {
        if let Ok(text) = value.to_str() {
            for name in text.split(',') {
                let name = name.trim();
                if !name.is_empty() {
                    names.push(name.to_ascii_lowercase());
                }
            }
        }
    }
    names
}

fn escape_value(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('&', "%26")
        .replace('=', "%3D")
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    #[test]
    fn target_from_absolute_uri() {
        let uri: Uri = "http://example.com/a/b?q=1".parse().unwrap();
        let target = Target::from_uri(&uri).unwrap();
        assert_eq!(target.scheme(), "http");
        assert_eq!(target.host(), "example.com");
        assert_eq!(target.port(), 80);
    }

    #[test]
    fn cache_key_includes_method_and_query() {
        let uri: Uri = "http://example.com/a?q=1".parse().unwrap();
        let target = Target::from_uri(&uri).unwrap();
        assert_eq!(
            cache_key(&target, &Method::GET, &uri),
            "GET http://example.com:80/a?q=1"
        );
    }

    #[test]
    fn variant_key_is_canonical_across_name_order() {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("text/html"));
        headers.insert("accept-language", HeaderValue::from_static("en"));
        let a = variant_key(&["Accept".into(), "Accept-Language".into()], &headers);
        let b = variant_key(&["accept-language".into(), "ACCEPT".into()], &headers);
        assert_eq!(a, b);
        assert_eq!(a, "{accept=text/html&accept-language=en}");
    }

    #[test]
    fn variant_key_missing_header_is_empty() {
        let headers = HeaderMap::new();
        assert_eq!(variant_key(&["accept".into()], &headers), "{accept=}");
    }

    #[test]
    fn variant_key_escapes_separators() {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("a=b&c"));
        assert_eq!(variant_key(&["accept".into()], &headers), "{accept=a%3Db%26c}");
    }

    #[test]
    fn vary_names_lowercased_from_multiple_headers() {
        let mut headers = HeaderMap::new();
        headers.append(VARY, HeaderValue::from_static("Accept, Accept-Encoding"));
        headers.append(VARY, HeaderValue::from_static("User-Agent"));
        assert_eq!(
            vary_header_names(&headers),
            vec!["accept", "accept-encoding", "user-agent"]
        );
    }
}
