//! Transparent client-side HTTP/1.1 caching for request pipelines.
//!
//! `cachefront` provides [`CachingExecutor`], a request-execution stage that
//! intercepts classic HTTP requests, decides whether a locally stored
//! response can satisfy them, revalidates stored responses against the
//! origin, and stores newly received responses subject to HTTP caching
//! rules. The implementation is conditionally compliant with HTTP/1.1:
//! all the MUSTs and MUST NOTs are obeyed, and most of the SHOULDs.
//!
//! Communication with the origin is delegated to the next stage in the
//! pipeline via the [`Upstream`] trait. Physical storage is delegated to a
//! [`Storage`](storage::Storage) backend behind the
//! [`HttpCache`](storage::HttpCache) façade.
//!
//! Byte-range requests are not supported: the cache responds as if it does
//! not implement partial content and never stores `206` responses.

/// Body buffering and prefix-replay adapters.
///
/// [`BufferedBody`](body::BufferedBody) lets the executor buffer a response
/// body up to the configured object size limit while preserving the ability
/// to hand the client the full stream when the limit is exceeded.
pub mod body;

/// Injectable wall clock.
///
/// All time reads inside the executor go through the [`Clock`](clock::Clock)
/// trait so that freshness arithmetic is testable.
pub mod clock;

/// Request and response protocol compliance.
///
/// Normalizes incoming requests, flags fatally noncompliant ones, and
/// repairs protocol deficiencies in origin responses (missing `Date`,
/// entity headers on `304`, mismatched warnings).
pub mod compliance;

/// Cache configuration.
pub mod config;

/// Conditional revalidation request construction.
pub mod conditional;

/// Per-call scope and observable cache outcome.
pub mod context;

/// Stored entry model: [`CacheEntry`](entry::CacheEntry), body resources,
/// and variant metadata.
pub mod entry;

/// Error types for cache operations.
pub mod error;

/// The caching execution state machine.
pub mod executor;

/// Client response materialization from stored entries.
pub mod generator;

/// `Cache-Control` parsing, entity tag comparison, and HTTP-date handling.
pub mod headers;

/// Cache identity: targets, fingerprints, and variant keys.
pub mod key;

/// Metrics recording for cache observability.
///
/// With the `metrics` feature enabled the executor mirrors its hit, miss,
/// and update counters into the `metrics` facade.
pub mod metrics;

/// Caching policy: validity arithmetic, request/response cacheability, and
/// stored-entry suitability.
pub mod policy;

/// Incoming request head snapshot.
pub mod request;

/// Background revalidation worker pool.
pub mod revalidator;

/// Storage backend trait and the [`HttpCache`](storage::HttpCache) façade.
pub mod storage;

/// Tower layer integration.
pub mod tower;

/// The `proceed` capability: calling the next pipeline stage.
pub mod upstream;

pub use body::BufferedBody;
pub use clock::{Clock, SystemClock};
pub use config::CacheConfig;
pub use context::{CacheContext, CacheResponseStatus, Scope};
pub use entry::CacheEntry;
pub use error::StorageError;
pub use executor::CachingExecutor;
pub use key::Target;
pub use request::RequestHead;
pub use revalidator::AsyncRevalidator;
pub use upstream::Upstream;
