//! The `proceed` capability: calling the next pipeline stage.

use std::future::Future;

use http::{Request, Response};
use http_body::Body as HttpBody;

use crate::body::BufferedBody;

/// The next stage of the request pipeline.
///
/// The executor is agnostic to what sits behind this trait: a connection
/// pool, another interceptor, or a scripted test double. A call blocks the
/// task until the backend has produced a response head; transport errors
/// surface as `Self::Error` and propagate to the pipeline caller.
pub trait Upstream<ReqBody>
where
    ReqBody: HttpBody,
{
    /// Body type of backend responses.
    type Body: HttpBody;

    /// Transport or protocol error type.
    type Error;

    /// The in-flight backend call.
    type Future: Future<Output = Result<Response<BufferedBody<Self::Body>>, Self::Error>> + Send;

    /// Forwards `request` to the backend.
    fn call(&mut self, request: Request<BufferedBody<ReqBody>>) -> Self::Future;
}
