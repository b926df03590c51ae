//! Execution states of a single cache pass.
//!
//! The executor threads one request through these states; every transition
//! is driven by the loop in
//! [`CachingExecutor::execute`](super::CachingExecutor::execute).

use std::fmt;

use http::{Request, Response};
use http_body::Body as HttpBody;

use crate::body::BufferedBody;
use crate::entry::CacheEntry;

/// Position of a request inside the caching state machine.
///
/// `B` is the client request body, `RB` the backend response body.
pub(super) enum ExecState<B, RB>
where
    B: HttpBody,
    RB: HttpBody,
{
    /// Decide whether the request is a candidate for cache lookup.
    Classify { request: Request<BufferedBody<B>> },
    /// Ask storage for an entry matching the request.
    Lookup { request: Request<BufferedBody<B>> },
    /// An entry was found; evaluate suitability and revalidation.
    Hit {
        request: Request<BufferedBody<B>>,
        entry: CacheEntry,
    },
    /// No entry; try variant negotiation, else call the backend.
    Miss { request: Request<BufferedBody<B>> },
    /// Storage failed while reading a present entry; pass through without
    /// caching semantics.
    Failed { request: Request<BufferedBody<B>> },
    /// Forward the request to the backend and cache the outcome.
    CallBackend { request: Request<BufferedBody<B>> },
    /// Terminal: hand this response to the client.
    Deliver { response: Response<BufferedBody<RB>> },
}

impl<B, RB> fmt::Debug for ExecState<B, RB>
where
    B: HttpBody,
    RB: HttpBody,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecState::Classify { .. } => f.write_str("ExecState::Classify"),
            ExecState::Lookup { .. } => f.write_str("ExecState::Lookup"),
            ExecState::Hit { .. } => f.write_str("ExecState::Hit"),
            ExecState::Miss { .. } => f.write_str("ExecState::Miss"),
            ExecState::Failed { .. } => f.write_str("ExecState::Failed"),
            ExecState::CallBackend { .. } => f.write_str("ExecState::CallBackend"),
            ExecState::Deliver { .. } => f.write_str("ExecState::Deliver"),
        }
    }
}
