//! The caching execution state machine.

mod states;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use http::header::{ETAG, HeaderValue, IF_MODIFIED_SINCE, LAST_MODIFIED, MAX_FORWARDS, VIA, WARNING};
use http::{Request, Response, StatusCode, Version};
use http_body::Body as HttpBody;
use tracing::{debug, trace, warn};

use crate::body::{BufferedBody, ReadLimitOutcome};
use crate::clock::{Clock, SystemClock};
use crate::compliance::{RequestCompliance, ResponseCompliance};
use crate::conditional::ConditionalRequestBuilder;
use crate::config::CacheConfig;
use crate::context::{CacheResponseStatus, HitBindings, Scope};
use crate::entry::CacheEntry;
use crate::generator::ResponseGenerator;
use crate::headers::{CacheControl, declared_content_length, parse_http_date};
use crate::key::cache_key;
use crate::policy::{
    RequestCacheability, ResponseCacheability, SuitabilityChecker, ValidityPolicy,
};
use crate::request::RequestHead;
use crate::revalidator::AsyncRevalidator;
use crate::storage::{HttpCache, Storage, Variant};
use crate::upstream::Upstream;

use states::ExecState;

const WARNING_110_STALE: HeaderValue = HeaderValue::from_static("110 localhost \"Response is stale\"");
const WARNING_111_REVALIDATION_FAILED: HeaderValue =
    HeaderValue::from_static("111 localhost \"Revalidation failed\"");

struct Inner<S, C> {
    config: CacheConfig,
    cache: HttpCache<S>,
    validity: ValidityPolicy,
    request_cacheability: RequestCacheability,
    response_cacheability: ResponseCacheability,
    suitability: SuitabilityChecker,
    conditional: ConditionalRequestBuilder,
    request_compliance: RequestCompliance,
    response_compliance: ResponseCompliance,
    generator: ResponseGenerator,
    revalidator: Option<AsyncRevalidator>,
    clock: C,
    hits: AtomicU64,
    misses: AtomicU64,
    updates: AtomicU64,
    via: DashMap<Version, HeaderValue>,
}

/// Request executor responsible for transparent client-side caching.
///
/// The executor owns no mutable state beyond its counters and a small
/// per-protocol-version `Via` memo; it is safe for concurrent invocation
/// as long as the storage backend is. Clones share all state.
pub struct CachingExecutor<S, C = SystemClock> {
    inner: Arc<Inner<S, C>>,
}

impl<S, C> Clone for CachingExecutor<S, C> {
    fn clone(&self) -> Self {
        CachingExecutor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Storage> CachingExecutor<S> {
    /// Creates an executor over `storage` with the system clock and no
    /// background revalidator.
    pub fn new(storage: S, config: CacheConfig) -> Self {
        Self::with_parts(storage, config, None, SystemClock)
    }

    /// Creates an executor that serves eligible stale entries immediately
    /// and refreshes them through `revalidator`.
    pub fn with_revalidator(storage: S, config: CacheConfig, revalidator: AsyncRevalidator) -> Self {
        Self::with_parts(storage, config, Some(revalidator), SystemClock)
    }
}

impl<S, C> CachingExecutor<S, C>
where
    S: Storage,
    C: Clock,
{
    /// Creates an executor from explicit collaborators.
    pub fn with_parts(
        storage: S,
        config: CacheConfig,
        revalidator: Option<AsyncRevalidator>,
        clock: C,
    ) -> Self {
        let validity = ValidityPolicy::new(config.shared_cache);
        CachingExecutor {
            inner: Arc::new(Inner {
                cache: HttpCache::new(storage),
                validity,
                request_cacheability: RequestCacheability::new(),
                response_cacheability: ResponseCacheability::new(
                    config.max_object_size,
                    config.shared_cache,
                    config.never_cache_http10_responses_with_query,
                    config.caching_303_enabled,
                ),
                suitability: SuitabilityChecker::new(validity, config.shared_cache),
                conditional: ConditionalRequestBuilder::new(),
                request_compliance: RequestCompliance::new(config.weak_etag_on_put_delete_allowed),
                response_compliance: ResponseCompliance::new(),
                generator: ResponseGenerator::new(validity),
                revalidator,
                clock,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                updates: AtomicU64::new(0),
                via: DashMap::with_capacity(4),
                config,
            }),
        }
    }

    /// Times the cache answered a request without contacting the origin.
    pub fn cache_hits(&self) -> u64 {
        self.inner.hits.load(Ordering::Relaxed)
    }

    /// Times the origin was contacted for lack of an appropriate entry.
    pub fn cache_misses(&self) -> u64 {
        self.inner.misses.load(Ordering::Relaxed)
    }

    /// Times a request was satisfied by revalidating a stale entry.
    pub fn cache_updates(&self) -> u64 {
        self.inner.updates.load(Ordering::Relaxed)
    }

    /// Whether byte-range requests are supported. Always `false`: the
    /// cache responds as if it does not implement partial content.
    pub fn supports_range_and_content_range(&self) -> bool {
        false
    }

    /// The storage façade behind this executor.
    pub fn cache(&self) -> &HttpCache<S> {
        &self.inner.cache
    }
}

impl<S, C> CachingExecutor<S, C>
where
    S: Storage,
    C: Clock + 'static,
{
    /// Executes one request against the cache.
    ///
    /// Returns the client-facing response, contacting the backend through
    /// `upstream` when the cache cannot answer alone. Transport errors
    /// from the backend propagate; storage errors never do.
    pub async fn execute<B, U>(
        &self,
        mut request: Request<BufferedBody<B>>,
        scope: &mut Scope,
        mut upstream: U,
    ) -> Result<Response<BufferedBody<U::Body>>, U::Error>
    where
        B: HttpBody + Send + 'static,
        B::Error: Send,
        U: Upstream<B> + Clone + Send + 'static,
        U::Body: HttpBody + Send + Sync + Unpin + 'static,
        <U::Body as HttpBody>::Data: Send + Sync,
        <U::Body as HttpBody>::Error: Send + Sync,
        U::Future: Send,
    {
        scope
            .context
            .set_response_status(CacheResponseStatus::CacheMiss);

        // Phase 0: shortcuts.
        if requests_our_options(&request) {
            scope
                .context
                .set_response_status(CacheResponseStatus::CacheModuleResponse);
            return Ok(self.simple_response(StatusCode::NOT_IMPLEMENTED));
        }
        if let Some(violation) = self
            .inner
            .request_compliance
            .fatal_violations(&request)
            .first()
        {
            scope
                .context
                .set_response_status(CacheResponseStatus::CacheModuleResponse);
            return Ok(self.inner.generator.error_for_request(*violation));
        }

        // Phase 1: normalization. The pre-mutation head is kept for
        // deriving revalidation requests.
        let original = RequestHead::of(&request);
        self.inner.request_compliance.normalize(&mut request);
        let via = self.via_value(request.version());
        request.headers_mut().append(VIA, via);

        let head = RequestHead::of(&request);
        let mut state: ExecState<B, U::Body> = ExecState::Classify { request };

        loop {
            debug!("{:?}", &state);
            state = match state {
                // Phase 2: classification.
                ExecState::Classify { request } => {
                    if self
                        .inner
                        .request_cacheability
                        .is_servable_from_cache(&request)
                    {
                        ExecState::Lookup { request }
                    } else {
                        debug!("Request is not servable from cache");
                        if let Err(err) = self
                            .inner
                            .cache
                            .flush_invalidated_by_request(&scope.target, &head)
                            .await
                        {
                            warn!(error = %err, "Unable to flush invalidated entries from cache");
                        }
                        ExecState::CallBackend { request }
                    }
                }
                // Phase 3: lookup.
                ExecState::Lookup { request } => {
                    match self.inner.cache.get(&scope.target, &head).await {
                        Ok(Some(entry)) => ExecState::Hit { request, entry },
                        Ok(None) => {
                            debug!("Cache miss");
                            ExecState::Miss { request }
                        }
                        Err(err) => {
                            warn!(error = %err, "Unable to retrieve entries from cache");
                            ExecState::Failed { request }
                        }
                    }
                }
                ExecState::Hit { request, entry } => {
                    self.handle_hit(request, &head, &original, scope, &mut upstream, entry)
                        .await?
                }
                ExecState::Miss { request } => {
                    self.handle_miss(request, &head, &original, scope, &mut upstream)
                        .await?
                }
                ExecState::Failed { request } => {
                    self.record_miss(&scope.target, &head);
                    if only_if_cached(request.headers()) {
                        scope
                            .context
                            .set_response_status(CacheResponseStatus::CacheModuleResponse);
                        ExecState::Deliver {
                            response: self.simple_response(StatusCode::GATEWAY_TIMEOUT),
                        }
                    } else {
                        scope
                            .context
                            .set_response_status(CacheResponseStatus::Failure);
                        ExecState::Deliver {
                            response: upstream.call(request).await?,
                        }
                    }
                }
                ExecState::CallBackend { request } => ExecState::Deliver {
                    response: self.call_backend(request, scope, &mut upstream).await?,
                },
                ExecState::Deliver { response } => {
                    crate::metrics::record_response_status(scope.context.response_status());
                    return Ok(response);
                }
            };
        }
    }

    async fn handle_hit<B, U>(
        &self,
        request: Request<BufferedBody<B>>,
        head: &RequestHead,
        original: &RequestHead,
        scope: &mut Scope,
        upstream: &mut U,
        entry: CacheEntry,
    ) -> Result<ExecState<B, U::Body>, U::Error>
    where
        B: HttpBody + Send + 'static,
        B::Error: Send,
        U: Upstream<B> + Clone + Send + 'static,
        U::Body: HttpBody + Send + Sync + Unpin + 'static,
        <U::Body as HttpBody>::Data: Send + Sync,
        <U::Body as HttpBody>::Error: Send + Sync,
        U::Future: Send,
    {
        self.record_hit(&scope.target, head);
        let now = self.inner.clock.now();

        if self.inner.suitability.can_use(head, &entry, now) {
            debug!("Cache hit");
            let response = self.cached_response(head, &entry, now, scope);
            scope.context.record_hit(HitBindings {
                target: scope.target.clone(),
                method: head.method.clone(),
                uri: head.uri.clone(),
                status: response.status(),
            });
            return Ok(ExecState::Deliver { response });
        }

        if only_if_cached(request.headers()) {
            debug!("Cache entry not suitable but only-if-cached requested");
            scope
                .context
                .set_response_status(CacheResponseStatus::CacheModuleResponse);
            return Ok(ExecState::Deliver {
                response: self.simple_response(StatusCode::GATEWAY_TIMEOUT),
            });
        }

        // A stored 304 cannot answer an unconditional client; only a full
        // backend response can.
        if entry.status() == StatusCode::NOT_MODIFIED && !self.inner.suitability.is_conditional(head)
        {
            debug!("Cache entry not usable; calling backend");
            return Ok(ExecState::CallBackend { request });
        }

        debug!("Revalidating cache entry");
        self.revalidate(head, original, scope, upstream, entry, now)
            .await
    }

    async fn handle_miss<B, U>(
        &self,
        request: Request<BufferedBody<B>>,
        head: &RequestHead,
        original: &RequestHead,
        scope: &mut Scope,
        upstream: &mut U,
    ) -> Result<ExecState<B, U::Body>, U::Error>
    where
        B: HttpBody + Send + 'static,
        B::Error: Send,
        U: Upstream<B> + Clone + Send + 'static,
        U::Body: HttpBody + Send + Sync + Unpin + 'static,
        <U::Body as HttpBody>::Data: Send + Sync,
        <U::Body as HttpBody>::Error: Send + Sync,
        U::Future: Send,
    {
        self.record_miss(&scope.target, head);

        if only_if_cached(request.headers()) {
            scope
                .context
                .set_response_status(CacheResponseStatus::CacheModuleResponse);
            return Ok(ExecState::Deliver {
                response: self.simple_response(StatusCode::GATEWAY_TIMEOUT),
            });
        }

        let variants = match self
            .inner
            .cache
            .variants_with_etags(&scope.target, head)
            .await
        {
            Ok(variants) => variants,
            Err(err) => {
                warn!(error = %err, "Unable to retrieve variant entries from cache");
                HashMap::new()
            }
        };
        if !variants.is_empty() {
            return self
                .negotiate_from_variants(request, head, original, scope, upstream, variants)
                .await;
        }

        Ok(ExecState::CallBackend { request })
    }

    /// One conditional probe carrying every known variant validator.
    async fn negotiate_from_variants<B, U>(
        &self,
        request: Request<BufferedBody<B>>,
        head: &RequestHead,
        original: &RequestHead,
        scope: &mut Scope,
        upstream: &mut U,
        variants: HashMap<String, Variant>,
    ) -> Result<ExecState<B, U::Body>, U::Error>
    where
        B: HttpBody + Send + 'static,
        B::Error: Send,
        U: Upstream<B> + Clone + Send + 'static,
        U::Body: HttpBody + Send + Sync + Unpin + 'static,
        <U::Body as HttpBody>::Data: Send + Sync,
        <U::Body as HttpBody>::Error: Send + Sync,
        U::Future: Send,
    {
        let variant_list: Vec<Variant> = variants.values().cloned().collect();
        let conditional: Request<BufferedBody<B>> = self
            .inner
            .conditional
            .build_conditional_from_variants(head, &variant_list);
        let sent = RequestHead::of(&conditional);

        let request_sent = self.inner.clock.now();
        let mut response = upstream.call(conditional).await?;
        let response_received = self.inner.clock.now();
        self.append_via(&mut response);

        if response.status() != StatusCode::NOT_MODIFIED {
            return Ok(ExecState::Deliver {
                response: self
                    .handle_backend_response(&sent, scope, request_sent, response_received, response)
                    .await,
            });
        }

        let result_etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let result_etag = match result_etag {
            Some(etag) => etag,
            None => {
                warn!("304 response did not contain ETag");
                return Ok(ExecState::CallBackend { request });
            }
        };
        let variant = match variants.get(&result_etag) {
            Some(variant) => variant,
            None => {
                debug!("304 response did not contain ETag matching one sent in If-None-Match");
                return Ok(ExecState::CallBackend { request });
            }
        };

        if revalidation_response_is_too_old(response.headers(), &variant.entry) {
            let unconditional = self.inner.conditional.build_unconditional(original);
            return Ok(ExecState::CallBackend {
                request: unconditional,
            });
        }

        self.record_update(scope);

        let updated = match self
            .inner
            .cache
            .update_variant_entry(variant, response.headers(), request_sent, response_received)
            .await
        {
            Ok(updated) => updated,
            Err(err) => {
                warn!(error = %err, "Could not update variant cache entry");
                variant.entry.clone()
            }
        };
        if let Err(err) = self
            .inner
            .cache
            .reuse_variant_entry(&scope.target, head, variant)
            .await
        {
            warn!(error = %err, "Could not update variant map to reuse variant");
        }

        let now = self.inner.clock.now();
        let response = if self.inner.suitability.is_conditional(head)
            && self.inner.suitability.all_conditionals_match(head, &updated, now)
        {
            self.inner.generator.not_modified(&updated)
        } else {
            self.inner.generator.response(head, &updated, now)
        };
        Ok(ExecState::Deliver { response })
    }

    async fn revalidate<B, U>(
        &self,
        head: &RequestHead,
        original: &RequestHead,
        scope: &mut Scope,
        upstream: &mut U,
        entry: CacheEntry,
        now: DateTime<Utc>,
    ) -> Result<ExecState<B, U::Body>, U::Error>
    where
        B: HttpBody + Send + 'static,
        B::Error: Send,
        U: Upstream<B> + Clone + Send + 'static,
        U::Body: HttpBody + Send + Sync + Unpin + 'static,
        <U::Body as HttpBody>::Data: Send + Sync,
        <U::Body as HttpBody>::Error: Send + Sync,
        U::Future: Send,
    {
        if let Some(revalidator) = &self.inner.revalidator {
            if !self.stale_response_not_allowed(head, &entry, now)
                && self
                    .inner
                    .validity
                    .may_return_stale_while_revalidating(&entry, now)
            {
                trace!("Serving stale with asynchronous revalidation");
                let response = self.cached_response(head, &entry, now, scope);
                self.schedule_revalidation::<B, U>(
                    head.clone(),
                    original.clone(),
                    scope.target.clone(),
                    upstream.clone(),
                    entry,
                    revalidator,
                );
                return Ok(ExecState::Deliver { response });
            }
        }

        match self
            .revalidate_entry::<B, U>(head, original, scope, upstream, &entry)
            .await
        {
            Ok(response) => Ok(ExecState::Deliver { response }),
            Err(_transport) => {
                debug!("Revalidation failed");
                let response =
                    self.handle_revalidation_failure(head, &entry, self.inner.clock.now(), scope);
                Ok(ExecState::Deliver { response })
            }
        }
    }

    /// Synchronous revalidation: one conditional request, with a single
    /// unconditional retry when the backend's clock runs behind the entry.
    async fn revalidate_entry<B, U>(
        &self,
        head: &RequestHead,
        original: &RequestHead,
        scope: &mut Scope,
        upstream: &mut U,
        entry: &CacheEntry,
    ) -> Result<Response<BufferedBody<U::Body>>, U::Error>
    where
        B: HttpBody + Send + 'static,
        B::Error: Send,
        U: Upstream<B> + Clone + Send + 'static,
        U::Body: HttpBody + Send + Sync + Unpin + 'static,
        <U::Body as HttpBody>::Data: Send + Sync,
        <U::Body as HttpBody>::Error: Send + Sync,
        U::Future: Send,
    {
        let conditional: Request<BufferedBody<B>> =
            self.inner.conditional.build_conditional(original, entry);
        let mut sent = RequestHead::of(&conditional);

        let mut request_sent = self.inner.clock.now();
        let mut response = upstream.call(conditional).await?;
        let mut response_received = self.inner.clock.now();

        if revalidation_response_is_too_old(response.headers(), entry) {
            drop(response);
            let unconditional: Request<BufferedBody<B>> =
                self.inner.conditional.build_unconditional(original);
            sent = RequestHead::of(&unconditional);
            request_sent = self.inner.clock.now();
            response = upstream.call(unconditional).await?;
            response_received = self.inner.clock.now();
        }

        self.append_via(&mut response);

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED || status == StatusCode::OK {
            self.record_update(scope);
        }

        if status == StatusCode::NOT_MODIFIED {
            let updated = match self
                .inner
                .cache
                .update_entry(
                    &scope.target,
                    head,
                    entry,
                    response.headers(),
                    request_sent,
                    response_received,
                )
                .await
            {
                Ok(updated) => updated,
                Err(err) => {
                    warn!(error = %err, "Unable to update cache entry");
                    entry.clone()
                }
            };
            let now = self.inner.clock.now();
            if self.inner.suitability.is_conditional(head)
                && self.inner.suitability.all_conditionals_match(head, &updated, now)
            {
                return Ok(self.inner.generator.not_modified(&updated));
            }
            return Ok(self.inner.generator.response(head, &updated, now));
        }

        if stale_if_error_applies(status)
            && !self.stale_response_not_allowed(head, entry, self.inner.clock.now())
            && self
                .inner
                .validity
                .may_return_stale_if_error(&head.headers, entry, response_received)
        {
            let mut cached = self
                .inner
                .generator
                .response::<U::Body>(head, entry, self.inner.clock.now());
            cached.headers_mut().append(WARNING, WARNING_110_STALE);
            return Ok(cached);
        }

        Ok(self
            .handle_backend_response(&sent, scope, request_sent, response_received, response)
            .await)
    }

    fn schedule_revalidation<B, U>(
        &self,
        head: RequestHead,
        original: RequestHead,
        target: crate::key::Target,
        upstream: U,
        entry: CacheEntry,
        revalidator: &AsyncRevalidator,
    ) where
        B: HttpBody + Send + 'static,
        B::Error: Send,
        U: Upstream<B> + Clone + Send + 'static,
        U::Body: HttpBody + Send + Sync + Unpin + 'static,
        <U::Body as HttpBody>::Data: Send + Sync,
        <U::Body as HttpBody>::Error: Send + Sync,
        U::Future: Send,
    {
        let key = cache_key(&target, &head.method, &head.uri);
        let executor = self.clone();
        revalidator.schedule(key, async move {
            let mut scope = Scope::new(target);
            let mut upstream = upstream;
            // The refreshed response is discarded; only the storage side
            // effects of the revalidation matter here.
            match executor
                .revalidate_entry::<B, U>(&head, &original, &mut scope, &mut upstream, &entry)
                .await
            {
                Ok(_response) => debug!(uri = %head.uri, "Background revalidation completed"),
                Err(_err) => debug!(uri = %head.uri, "Background revalidation failed"),
            }
        });
    }

    async fn call_backend<B, U>(
        &self,
        request: Request<BufferedBody<B>>,
        scope: &mut Scope,
        upstream: &mut U,
    ) -> Result<Response<BufferedBody<U::Body>>, U::Error>
    where
        B: HttpBody + Send + 'static,
        B::Error: Send,
        U: Upstream<B> + Clone + Send + 'static,
        U::Body: HttpBody + Send + Sync + Unpin + 'static,
        <U::Body as HttpBody>::Data: Send + Sync,
        <U::Body as HttpBody>::Error: Send + Sync,
        U::Future: Send,
    {
        let sent = RequestHead::of(&request);
        let request_sent = self.inner.clock.now();
        trace!("Calling the backend");
        let mut response = upstream.call(request).await?;
        let response_received = self.inner.clock.now();
        self.append_via(&mut response);
        Ok(self
            .handle_backend_response(&sent, scope, request_sent, response_received, response)
            .await)
    }

    /// Decides the fate of a fresh backend response: repair, invalidate,
    /// store, or pass through.
    async fn handle_backend_response<RB>(
        &self,
        sent: &RequestHead,
        scope: &mut Scope,
        request_sent: DateTime<Utc>,
        response_received: DateTime<Utc>,
        mut response: Response<BufferedBody<RB>>,
    ) -> Response<BufferedBody<RB>>
    where
        RB: HttpBody + Send + Unpin + 'static,
        RB::Data: Send + Sync,
        RB::Error: Send + Sync,
    {
        trace!("Handling backend response");
        self.inner
            .response_compliance
            .ensure(&mut response, self.inner.clock.now());

        let storable = self.inner.response_cacheability.is_storable(sent, &response);
        if let Err(err) = self
            .inner
            .cache
            .flush_invalidated_by_response(&scope.target, sent, response.status(), response.headers())
            .await
        {
            warn!(error = %err, "Unable to flush invalidated entries from cache");
        }

        if storable && !self.already_have_newer_entry(scope, sent, &response).await {
            store_if_modified_since_for_304(sent, &mut response);
            return self
                .cache_and_return_response(sent, scope, request_sent, response_received, response)
                .await;
        }

        if !storable {
            if let Err(err) = self.inner.cache.flush_entries(&scope.target, sent).await {
                warn!(error = %err, "Unable to flush invalid cache entries");
            }
        }
        response
    }

    /// Buffers the body under the size limit and stores the response.
    async fn cache_and_return_response<RB>(
        &self,
        sent: &RequestHead,
        scope: &mut Scope,
        request_sent: DateTime<Utc>,
        response_received: DateTime<Utc>,
        response: Response<BufferedBody<RB>>,
    ) -> Response<BufferedBody<RB>>
    where
        RB: HttpBody + Send + Unpin + 'static,
        RB::Data: Send + Sync,
        RB::Error: Send + Sync,
    {
        let (parts, body) = response.into_parts();
        let buffered = match body.read_up_to(self.inner.config.max_object_size).await {
            ReadLimitOutcome::Complete(bytes) => bytes,
            ReadLimitOutcome::Overflow(partial) => {
                debug!("Response body exceeds the maximum object size; returning uncached");
                return Response::from_parts(parts, BufferedBody::Partial(partial));
            }
            ReadLimitOutcome::Failed(partial) => {
                debug!("Response body failed while buffering; returning uncached");
                return Response::from_parts(parts, BufferedBody::Partial(partial));
            }
        };

        if let Some(declared) = declared_content_length(&parts.headers) {
            let incomplete = matches!(
                parts.status,
                StatusCode::OK | StatusCode::PARTIAL_CONTENT
            ) && (buffered.len() as u64) < declared;
            if incomplete {
                let message = format!(
                    "Received incomplete response with Content-Length {declared} but actual body length {}",
                    buffered.len()
                );
                let mut error = Response::new(BufferedBody::complete(Bytes::from(message)));
                *error.status_mut() = StatusCode::BAD_GATEWAY;
                return error;
            }
        }

        match self
            .inner
            .cache
            .create_entry(
                &scope.target,
                sent,
                parts.status,
                parts.headers.clone(),
                buffered.clone(),
                request_sent,
                response_received,
            )
            .await
        {
            Ok(entry) => self
                .inner
                .generator
                .response(sent, &entry, self.inner.clock.now()),
            Err(err) => {
                warn!(error = %err, "Unable to store response in cache; returning uncached");
                Response::from_parts(parts, BufferedBody::complete(buffered))
            }
        }
    }

    /// A concurrent writer with a newer origin `Date` wins; this response
    /// is then returned without overwriting the stored entry.
    async fn already_have_newer_entry<RB>(
        &self,
        scope: &Scope,
        sent: &RequestHead,
        response: &Response<BufferedBody<RB>>,
    ) -> bool
    where
        RB: HttpBody,
        RB::Data: Sync,
        RB::Error: Sync,
    {
        let existing = match self.inner.cache.get(&scope.target, sent).await {
            Ok(Some(existing)) => existing,
            _ => return false,
        };
        let entry_date = match existing.date() {
            Some(date) => date,
            None => return false,
        };
        let response_date = match response.headers().get(http::header::DATE).and_then(parse_http_date) {
            Some(date) => date,
            None => return false,
        };
        response_date < entry_date
    }

    fn cached_response<RB>(
        &self,
        head: &RequestHead,
        entry: &CacheEntry,
        now: DateTime<Utc>,
        scope: &mut Scope,
    ) -> Response<BufferedBody<RB>>
    where
        RB: HttpBody,
    {
        let mut response = if self.inner.suitability.is_conditional(head) {
            self.inner.generator.not_modified(entry)
        } else {
            self.inner.generator.response(head, entry, now)
        };
        scope
            .context
            .set_response_status(CacheResponseStatus::CacheHit);
        if self.inner.validity.staleness_secs(entry, now) > 0 {
            response.headers_mut().append(WARNING, WARNING_110_STALE);
        }
        response
    }

    fn handle_revalidation_failure<RB>(
        &self,
        head: &RequestHead,
        entry: &CacheEntry,
        now: DateTime<Utc>,
        scope: &mut Scope,
    ) -> Response<BufferedBody<RB>>
    where
        RB: HttpBody,
    {
        if self.stale_response_not_allowed(head, entry, now) {
            scope
                .context
                .set_response_status(CacheResponseStatus::CacheModuleResponse);
            self.simple_response(StatusCode::GATEWAY_TIMEOUT)
        } else {
            let mut response = self.inner.generator.response(head, entry, now);
            scope
                .context
                .set_response_status(CacheResponseStatus::CacheHit);
            response
                .headers_mut()
                .append(WARNING, WARNING_111_REVALIDATION_FAILED);
            response
        }
    }

    fn stale_response_not_allowed(
        &self,
        head: &RequestHead,
        entry: &CacheEntry,
        now: DateTime<Utc>,
    ) -> bool {
        self.inner.validity.must_revalidate(entry)
            || (self.inner.config.shared_cache && self.inner.validity.proxy_revalidate(entry))
            || self.explicit_freshness_request(head, entry, now)
    }

    /// A request naming its own freshness bounds refuses staleness beyond
    /// them.
    fn explicit_freshness_request(
        &self,
        head: &RequestHead,
        entry: &CacheEntry,
        now: DateTime<Utc>,
    ) -> bool {
        let cc = CacheControl::from_headers(&head.headers);
        if let Some(Some(max_stale)) = cc.max_stale {
            if self.inner.validity.staleness_secs(entry, now) > max_stale {
                return true;
            }
        }
        cc.min_fresh.is_some() || cc.max_age.is_some()
    }

    fn record_hit(&self, target: &crate::key::Target, head: &RequestHead) {
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        trace!(host = %target, uri = %head.uri, "Cache hit");
    }

    fn record_miss(&self, target: &crate::key::Target, head: &RequestHead) {
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        trace!(host = %target, uri = %head.uri, "Cache miss");
    }

    fn record_update(&self, scope: &mut Scope) {
        self.inner.updates.fetch_add(1, Ordering::Relaxed);
        scope
            .context
            .set_response_status(CacheResponseStatus::Validated);
    }

    fn simple_response<RB>(&self, status: StatusCode) -> Response<BufferedBody<RB>>
    where
        RB: HttpBody,
    {
        let mut response = Response::new(BufferedBody::empty());
        *response.status_mut() = status;
        response
    }

    fn via_value(&self, version: Version) -> HeaderValue {
        if let Some(value) = self.inner.via.get(&version) {
            return value.value().clone();
        }
        let (major, minor) = match version {
            Version::HTTP_09 => (0, 9),
            Version::HTTP_10 => (1, 0),
            Version::HTTP_11 => (1, 1),
            Version::HTTP_2 => (2, 0),
            Version::HTTP_3 => (3, 0),
            _ => (1, 1),
        };
        let release = env!("CARGO_PKG_VERSION");
        let text = format!("{major}.{minor} localhost (cachefront/{release} (cache))");
        let value = HeaderValue::from_str(&text).expect("via value is always a valid header");
        self.inner.via.insert(version, value.clone());
        value
    }

    fn append_via<RB>(&self, response: &mut Response<BufferedBody<RB>>)
    where
        RB: HttpBody,
    {
        let via = self.via_value(response.version());
        response.headers_mut().append(VIA, via);
    }
}

/// A self-directed probe: `OPTIONS * HTTP/1.1` with `Max-Forwards: 0`.
fn requests_our_options<B>(request: &Request<B>) -> bool {
    request.method() == http::Method::OPTIONS
        && request.uri().path() == "*"
        && request
            .headers()
            .get(MAX_FORWARDS)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim() == "0")
            .unwrap_or(false)
}

fn only_if_cached(headers: &http::HeaderMap) -> bool {
    let cached = CacheControl::from_headers(headers).only_if_cached;
    if cached {
        trace!("Request marked only-if-cached");
    }
    cached
}

/// The origin's clock runs behind the entry it is validating: the response
/// `Date` strictly precedes the stored `Date`. RFC 2616 13.2.6 recommends
/// one unconditional retry.
fn revalidation_response_is_too_old(
    response_headers: &http::HeaderMap,
    entry: &CacheEntry,
) -> bool {
    let entry_date = match entry.date() {
        Some(date) => date,
        None => return false,
    };
    let response_date = match response_headers
        .get(http::header::DATE)
        .and_then(parse_http_date)
    {
        Some(date) => date,
        None => return false,
    };
    response_date < entry_date
}

fn stale_if_error_applies(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// A storable `304` needs a `Last-Modified` for later entry matching; the
/// client's `If-Modified-Since` value is the origin's own answer to what
/// that date is. The header never reaches clients, since stored entries
/// are regenerated rather than forwarded.
fn store_if_modified_since_for_304<RB>(sent: &RequestHead, response: &mut Response<BufferedBody<RB>>)
where
    RB: HttpBody,
{
    if response.status() != StatusCode::NOT_MODIFIED {
        return;
    }
    if response.headers().contains_key(LAST_MODIFIED) {
        return;
    }
    if let Some(value) = sent.headers.get(IF_MODIFIED_SINCE) {
        response.headers_mut().insert(LAST_MODIFIED, value.clone());
    }
}
