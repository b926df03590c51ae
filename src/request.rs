//! Snapshot of an incoming request head.

use http::{HeaderMap, Method, Request, Uri, Version};
use http_body::Body as HttpBody;

use crate::body::BufferedBody;

/// An owned copy of a request's method, URI, version, and headers.
///
/// The executor captures a head of the original request before any
/// normalization so that revalidation requests can be derived from the
/// client's untouched header set. Heads are cheap to clone and carry no
/// body.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    /// Copies the head of `request`.
    pub fn of<B>(request: &Request<B>) -> Self {
        RequestHead {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
        }
    }

    /// Materializes the head into a bodiless request.
    pub fn into_request<B>(self) -> Request<BufferedBody<B>>
    where
        B: HttpBody,
    {
        let mut request = Request::new(BufferedBody::empty());
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers;
        request
    }
}

impl<B> From<&Request<B>> for RequestHead {
    fn from(request: &Request<B>) -> Self {
        RequestHead::of(request)
    }
}
