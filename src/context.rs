//! Per-call scope and observable cache outcome.

use http::{Method, StatusCode, Uri};

use crate::key::Target;

/// How the cache answered a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheResponseStatus {
    /// The response was served from storage without contacting the origin.
    CacheHit,
    /// The origin was contacted because no suitable entry was stored.
    #[default]
    CacheMiss,
    /// A stale entry was refreshed against the origin.
    Validated,
    /// The cache answered on its own behalf (504, 501, compliance errors).
    CacheModuleResponse,
    /// Storage failed while reading a present entry; the call was passed
    /// through without caching semantics.
    Failure,
}

/// Bindings recorded when a response is served from the cache, for
/// downstream observers.
#[derive(Debug, Clone)]
pub struct HitBindings {
    /// The route the request was resolved against.
    pub target: Target,
    /// Method of the synthesized exchange.
    pub method: Method,
    /// Effective URI of the synthesized exchange.
    pub uri: Uri,
    /// Status of the response handed to the client.
    pub status: StatusCode,
}

/// Mutable per-call context written by the executor.
#[derive(Debug, Clone, Default)]
pub struct CacheContext {
    response_status: CacheResponseStatus,
    hit: Option<HitBindings>,
}

impl CacheContext {
    /// The recorded cache outcome for this call.
    pub fn response_status(&self) -> CacheResponseStatus {
        self.response_status
    }

    /// Bindings of the synthesized exchange, present on cache hits.
    pub fn hit_bindings(&self) -> Option<&HitBindings> {
        self.hit.as_ref()
    }

    pub(crate) fn set_response_status(&mut self, status: CacheResponseStatus) {
        self.response_status = status;
    }

    pub(crate) fn record_hit(&mut self, bindings: HitBindings) {
        self.hit = Some(bindings);
    }
}

/// Per-call scope carried through one execution.
///
/// The scope names the route the request travels on and holds the
/// [`CacheContext`] the executor reports its outcome into.
#[derive(Debug, Clone)]
pub struct Scope {
    /// The origin this call is routed to.
    pub target: Target,
    /// Observable side output of the execution.
    pub context: CacheContext,
}

impl Scope {
    /// Creates a scope for the given route.
    pub fn new(target: Target) -> Self {
        Scope {
            target,
            context: CacheContext::default(),
        }
    }
}
