//! Tower layer integration.
//!
//! [`CacheLayer`] wraps a tower [`Service`] with the caching executor. The
//! wrapped service plays the role of the backend: it is called through a
//! [`TowerUpstream`] adapter whenever the cache cannot answer alone. Every
//! response gains a header reporting the cache outcome.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::ready;
use http::header::{HeaderName, HeaderValue};
use http::{Request, Response};
use http_body::Body as HttpBody;
use pin_project::pin_project;
use ::tower::{Layer, Service};

use crate::body::BufferedBody;
use crate::clock::{Clock, SystemClock};
use crate::context::{CacheResponseStatus, Scope};
use crate::executor::CachingExecutor;
use crate::key::Target;
use crate::storage::Storage;
use crate::upstream::Upstream;

/// Header reporting how the cache answered, added to every response.
pub const CACHE_RESPONSE_STATUS_HEADER: HeaderName =
    HeaderName::from_static("x-cache-response-status");

fn status_header_value(status: CacheResponseStatus) -> HeaderValue {
    match status {
        CacheResponseStatus::CacheHit => HeaderValue::from_static("HIT"),
        CacheResponseStatus::CacheMiss => HeaderValue::from_static("MISS"),
        CacheResponseStatus::Validated => HeaderValue::from_static("VALIDATED"),
        CacheResponseStatus::CacheModuleResponse => HeaderValue::from_static("MODULE"),
        CacheResponseStatus::Failure => HeaderValue::from_static("FAILURE"),
    }
}

/// Tower layer applying transparent HTTP caching to a service.
pub struct CacheLayer<St, C = SystemClock> {
    executor: CachingExecutor<St, C>,
}

impl<St, C> CacheLayer<St, C> {
    /// Wraps services with the given executor. Clones of the layer share
    /// the executor and its storage.
    pub fn new(executor: CachingExecutor<St, C>) -> Self {
        CacheLayer { executor }
    }
}

impl<St, C> Clone for CacheLayer<St, C> {
    fn clone(&self) -> Self {
        CacheLayer {
            executor: self.executor.clone(),
        }
    }
}

impl<S, St, C> Layer<S> for CacheLayer<St, C> {
    type Service = CacheService<S, St, C>;

    fn layer(&self, service: S) -> Self::Service {
        CacheService {
            upstream: service,
            executor: self.executor.clone(),
        }
    }
}

/// Tower service produced by [`CacheLayer`].
pub struct CacheService<S, St, C = SystemClock> {
    upstream: S,
    executor: CachingExecutor<St, C>,
}

impl<S, St, C> Clone for CacheService<S, St, C>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        CacheService {
            upstream: self.upstream.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<S, St, C, ReqBody, ResBody> Service<Request<ReqBody>> for CacheService<S, St, C>
where
    S: Service<Request<BufferedBody<ReqBody>>, Response = Response<ResBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    S::Error: Send,
    St: Storage,
    C: Clock + 'static,
    ReqBody: HttpBody + Send + 'static,
    ReqBody::Error: Send,
    ResBody: HttpBody + Send + Sync + Unpin + 'static,
    ResBody::Data: Send + Sync,
    ResBody::Error: Send + Sync,
{
    type Response = Response<BufferedBody<ResBody>>;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.upstream.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let executor = self.executor.clone();
        let upstream = TowerUpstream::new(self.upstream.clone());

        let (parts, body) = request.into_parts();
        let request = Request::from_parts(parts, BufferedBody::Passthrough(body));
        let target = target_of(&request);

        Box::pin(async move {
            let mut scope = Scope::new(target);
            let mut response = executor.execute(request, &mut scope, upstream).await?;
            response.headers_mut().insert(
                CACHE_RESPONSE_STATUS_HEADER,
                status_header_value(scope.context.response_status()),
            );
            Ok(response)
        })
    }
}

/// Route derivation: the absolute request URI, else the `Host` header.
fn target_of<B>(request: &Request<B>) -> Target {
    if let Some(target) = Target::from_uri(request.uri()) {
        return target;
    }
    let host = request
        .headers()
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse() {
            Ok(port) => Target::new("http", name, port),
            Err(_) => Target::new("http", host, 80),
        },
        None => Target::new("http", host, 80),
    }
}

/// Future returned by [`TowerUpstream::call`]; converts the service
/// response into a cacheable passthrough-bodied response.
#[pin_project]
pub struct TowerUpstreamFuture<F, ResBody, E> {
    #[pin]
    inner: F,
    _marker: PhantomData<fn() -> (ResBody, E)>,
}

impl<F, ResBody, E> TowerUpstreamFuture<F, ResBody, E> {
    fn new(inner: F) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

impl<F, ResBody, E> Future for TowerUpstreamFuture<F, ResBody, E>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    ResBody: HttpBody,
{
    type Output = Result<Response<BufferedBody<ResBody>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match ready!(this.inner.poll(cx)) {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                Poll::Ready(Ok(Response::from_parts(
                    parts,
                    BufferedBody::Passthrough(body),
                )))
            }
            Err(error) => Poll::Ready(Err(error)),
        }
    }
}

/// Adapter letting the executor call a tower service as its backend.
pub struct TowerUpstream<S, ReqBody, ResBody> {
    service: S,
    _marker: PhantomData<fn(ReqBody) -> ResBody>,
}

impl<S, ReqBody, ResBody> TowerUpstream<S, ReqBody, ResBody> {
    /// Wraps `service` as the next pipeline stage.
    pub fn new(service: S) -> Self {
        Self {
            service,
            _marker: PhantomData,
        }
    }
}

impl<S: Clone, ReqBody, ResBody> Clone for TowerUpstream<S, ReqBody, ResBody> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            _marker: PhantomData,
        }
    }
}

impl<S, ReqBody, ResBody> Upstream<ReqBody> for TowerUpstream<S, ReqBody, ResBody>
where
    S: Service<Request<BufferedBody<ReqBody>>, Response = Response<ResBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    S::Error: Send,
    ReqBody: HttpBody + Send + 'static,
    ReqBody::Error: Send,
    ResBody: HttpBody + Send + Sync + 'static,
    ResBody::Error: Sync,
{
    type Body = ResBody;
    type Error = S::Error;
    type Future = TowerUpstreamFuture<S::Future, ResBody, S::Error>;

    fn call(&mut self, request: Request<BufferedBody<ReqBody>>) -> Self::Future {
        TowerUpstreamFuture::new(self.service.call(request))
    }
}
