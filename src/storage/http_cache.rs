//! The storage façade: atomic put/get/update/invalidate over a backend,
//! including variant map management for content-negotiated resources.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{
    CONNECTION, CONTENT_LENGTH, CONTENT_LOCATION, HeaderMap, HeaderName, LOCATION,
    PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE, WARNING,
};
use http::{Method, StatusCode, Uri};
use tracing::debug;

use crate::entry::{CacheEntry, Resource};
use crate::error::StorageResult;
use crate::key::{Target, cache_key, variant_cache_key, variant_key};
use crate::request::RequestHead;
use crate::storage::Storage;

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// One stored variant of a content-negotiated resource.
#[derive(Debug, Clone)]
pub struct Variant {
    /// Canonical key of the varying request header values.
    pub variant_key: String,
    /// Backend key the variant entry is stored under.
    pub storage_key: String,
    /// The stored entry itself.
    pub entry: CacheEntry,
}

/// High-level cache operations over a [`Storage`] backend.
///
/// For resources with `Vary`, a parent entry stored under the plain
/// fingerprint maps variant keys to the backend keys of the variant
/// entries; `get` resolves the correct variant for a request.
#[derive(Debug, Clone)]
pub struct HttpCache<S> {
    storage: S,
}

impl<S: Storage> HttpCache<S> {
    pub fn new(storage: S) -> Self {
        HttpCache { storage }
    }

    /// The backend behind this façade.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn root_key(&self, target: &Target, head: &RequestHead) -> String {
        cache_key(target, &head.method, &head.uri)
    }

    /// Looks up the entry satisfying `head`, resolving `Vary` variants.
    pub async fn get(&self, target: &Target, head: &RequestHead) -> StorageResult<Option<CacheEntry>> {
        let root_key = self.root_key(target, head);
        let root = match self.storage.read(&root_key).await? {
            Some(root) => root,
            None => return Ok(None),
        };
        if !root.has_vary() {
            return Ok(Some(root));
        }
        let wanted = variant_key(&root.vary_names(), &head.headers);
        match root.variant_map().get(&wanted) {
            Some(storage_key) => self.storage.read(storage_key).await,
            None => Ok(None),
        }
    }

    /// All known variants of the resource `head` names, keyed by entity tag.
    ///
    /// Empty when the fingerprint has no variant parent. Variants without
    /// an entity tag cannot participate in negotiation and are skipped.
    pub async fn variants_with_etags(
        &self,
        target: &Target,
        head: &RequestHead,
    ) -> StorageResult<HashMap<String, Variant>> {
        let root_key = self.root_key(target, head);
        let mut variants = HashMap::new();
        let root = match self.storage.read(&root_key).await? {
            Some(root) => root,
            None => return Ok(variants),
        };
        for (vkey, storage_key) in root.variant_map() {
            if let Some(entry) = self.storage.read(storage_key).await? {
                if let Some(etag) = entry.etag().and_then(|v| v.to_str().ok()) {
                    variants.insert(
                        etag.to_owned(),
                        Variant {
                            variant_key: vkey.clone(),
                            storage_key: storage_key.clone(),
                            entry,
                        },
                    );
                }
            }
        }
        Ok(variants)
    }

    /// Stores a new entry for the exchange `head` → response parts.
    ///
    /// Responses carrying `Vary` are stored as variants under the parent
    /// fingerprint entry.
    pub async fn create_entry(
        &self,
        target: &Target,
        head: &RequestHead,
        status: StatusCode,
        response_headers: HeaderMap,
        body: Bytes,
        request_sent: DateTime<Utc>,
        response_received: DateTime<Utc>,
    ) -> StorageResult<CacheEntry> {
        let entry = CacheEntry::new(
            head.method.clone(),
            head.uri.clone(),
            status,
            response_headers,
            Resource::new(body),
            request_sent,
            response_received,
        );
        self.store(target, head, entry).await
    }

    /// Applies a `304` header merge onto `entry` and stores the result.
    ///
    /// The body resource is retained; only end-to-end headers from the 304
    /// replace their stored counterparts.
    pub async fn update_entry(
        &self,
        target: &Target,
        head: &RequestHead,
        entry: &CacheEntry,
        not_modified_headers: &HeaderMap,
        request_sent: DateTime<Utc>,
        response_received: DateTime<Utc>,
    ) -> StorageResult<CacheEntry> {
        let merged = merge_entry(entry, not_modified_headers, request_sent, response_received);
        self.store(target, head, merged).await
    }

    /// Variant-aware `304` merge: updates the named variant in place.
    ///
    /// The parent map is left untouched; record the reuse separately with
    /// [`reuse_variant_entry`](Self::reuse_variant_entry).
    pub async fn update_variant_entry(
        &self,
        variant: &Variant,
        not_modified_headers: &HeaderMap,
        request_sent: DateTime<Utc>,
        response_received: DateTime<Utc>,
    ) -> StorageResult<CacheEntry> {
        let mut merged = merge_entry(
            &variant.entry,
            not_modified_headers,
            request_sent,
            response_received,
        );
        merged.variant_key = Some(variant.variant_key.clone());
        self.storage.write(&variant.storage_key, merged.clone()).await?;
        Ok(merged)
    }

    /// Records that requests shaped like `head` now canonically map to
    /// `variant`: the request's own variant key starts pointing at the
    /// matched variant's storage key.
    pub async fn reuse_variant_entry(
        &self,
        target: &Target,
        head: &RequestHead,
        variant: &Variant,
    ) -> StorageResult<()> {
        let root_key = self.root_key(target, head);
        let mut root = match self.storage.read(&root_key).await? {
            Some(root) => root,
            None => variant.entry.clone(),
        };
        let requested = variant_key(&root.vary_names(), &head.headers);
        root.variant_map
            .insert(requested, variant.storage_key.clone());
        self.storage.write(&root_key, root).await
    }

    /// Invalidates entries targeted by an unsafe request. Safe on read
    /// methods, where it does nothing.
    pub async fn flush_invalidated_by_request(
        &self,
        target: &Target,
        head: &RequestHead,
    ) -> StorageResult<()> {
        if head.method == Method::GET || head.method == Method::HEAD {
            return Ok(());
        }
        debug!(method = %head.method, uri = %head.uri, "Flushing entries invalidated by request");
        self.flush_uri(target, &head.uri).await
    }

    /// Invalidates entries named by a response's `Location` and
    /// `Content-Location` on the request's own authority, plus the request
    /// URI itself for unsafe methods.
    ///
    /// A stored entry newer than the response (by origin `Date`) is kept.
    pub async fn flush_invalidated_by_response(
        &self,
        target: &Target,
        head: &RequestHead,
        response_status: StatusCode,
        response_headers: &HeaderMap,
    ) -> StorageResult<()> {
        self.flush_invalidated_by_request(target, head).await?;

        if !(response_status.is_success() || response_status.is_redirection()) {
            return Ok(());
        }
        let response_date = response_headers
            .get(http::header::DATE)
            .and_then(crate::headers::parse_http_date);

        for name in [LOCATION, CONTENT_LOCATION] {
            let uri = response_headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<Uri>().ok());
            let uri = match uri {
                Some(uri) => uri,
                None => continue,
            };
            if let Some(location_target) = Target::from_uri(&uri) {
                if location_target != *target {
                    continue;
                }
            }
            if self.newer_entry_exists(target, &uri, response_date).await? {
                continue;
            }
            self.flush_uri(target, &uri).await?;
        }
        Ok(())
    }

    /// Hard-removes the entries for the fingerprint of `head`.
    pub async fn flush_entries(&self, target: &Target, head: &RequestHead) -> StorageResult<()> {
        self.flush_uri(target, &head.uri).await
    }

    async fn newer_entry_exists(
        &self,
        target: &Target,
        uri: &Uri,
        response_date: Option<DateTime<Utc>>,
    ) -> StorageResult<bool> {
        let response_date = match response_date {
            Some(date) => date,
            None => return Ok(false),
        };
        let key = cache_key(target, &Method::GET, uri);
        if let Some(existing) = self.storage.read(&key).await? {
            if let Some(entry_date) = existing.date() {
                return Ok(entry_date > response_date);
            }
        }
        Ok(false)
    }

    async fn flush_uri(&self, target: &Target, uri: &Uri) -> StorageResult<()> {
        for method in [Method::GET, Method::HEAD] {
            let key = cache_key(target, &method, uri);
            if let Some(root) = self.storage.read(&key).await? {
                for storage_key in root.variant_map().values() {
                    self.storage.remove(storage_key).await?;
                }
            }
            self.storage.remove(&key).await?;
        }
        Ok(())
    }

    async fn store(
        &self,
        target: &Target,
        head: &RequestHead,
        mut entry: CacheEntry,
    ) -> StorageResult<CacheEntry> {
        let root_key = self.root_key(target, head);
        if !entry.has_vary() {
            entry.variant_key = None;
            self.storage.write(&root_key, entry.clone()).await?;
            return Ok(entry);
        }

        let vkey = variant_key(&entry.vary_names(), &head.headers);
        let storage_key = variant_cache_key(&vkey, &root_key);
        entry.variant_key = Some(vkey.clone());
        entry.variant_map.clear();
        self.storage.write(&storage_key, entry.clone()).await?;

        let mut root = match self.storage.read(&root_key).await? {
            Some(root) => root,
            None => entry.clone(),
        };
        root.variant_map.insert(vkey, storage_key);
        self.storage.write(&root_key, root).await?;
        Ok(entry)
    }
}

/// Hop-by-hop headers never merged from a `304` onto a stored entry.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    *name == CONNECTION
        || *name == KEEP_ALIVE
        || *name == PROXY_AUTHENTICATE
        || *name == PROXY_AUTHORIZATION
        || *name == TE
        || *name == TRAILER
        || *name == TRANSFER_ENCODING
        || *name == UPGRADE
        || *name == CONTENT_LENGTH
}

fn merge_entry(
    entry: &CacheEntry,
    not_modified_headers: &HeaderMap,
    request_sent: DateTime<Utc>,
    response_received: DateTime<Utc>,
) -> CacheEntry {
    let mut headers = entry.headers().clone();

    // 1xx warnings describe the transient exchange and do not survive
    // revalidation.
    let kept_warnings: Vec<_> = headers
        .get_all(WARNING)
        .iter()
        .filter(|value| {
            value
                .to_str()
                .map(|text| !text.trim_start().starts_with('1'))
                .unwrap_or(true)
        })
        .cloned()
        .collect();
    headers.remove(WARNING);
    for value in kept_warnings {
        headers.append(WARNING, value);
    }

    let mut replaced: Vec<HeaderName> = Vec::new();
    for (name, value) in not_modified_headers {
        if is_hop_by_hop(name) {
            continue;
        }
        if !replaced.contains(name) {
            headers.remove(name);
            replaced.push(name.clone());
        }
        headers.append(name.clone(), value.clone());
    }

    let mut merged = entry.clone();
    merged.headers = headers;
    merged.request_sent = request_sent;
    merged.response_received = response_received;
    merged
}

#[cfg(test)]
mod tests {
    use http::header::{DATE, ETAG, HeaderValue, VARY};
    use http::Request;

    use crate::headers::fmt_http_date;
    use crate::storage::InMemoryStorage;

    use super::*;

    fn target() -> Target {
        Target::new("http", "example.com", 80)
    }

    fn head(headers: &[(&str, &str)]) -> RequestHead {
        let mut builder = Request::builder().method(Method::GET).uri("http://example.com/x");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        RequestHead::of(&builder.body(()).unwrap())
    }

    fn response_headers(extra: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(DATE, fmt_http_date(Utc::now()));
        for (name, value) in extra {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    fn cache() -> HttpCache<InMemoryStorage> {
        HttpCache::new(InMemoryStorage::new())
    }

    #[tokio::test]
    async fn round_trip_plain_entry() {
        let cache = cache();
        let now = Utc::now();
        let created = cache
            .create_entry(
                &target(),
                &head(&[]),
                StatusCode::OK,
                response_headers(&[]),
                Bytes::from_static(b"abc"),
                now,
                now,
            )
            .await
            .unwrap();
        let found = cache.get(&target(), &head(&[])).await.unwrap().unwrap();
        assert_eq!(found.status(), created.status());
        assert_eq!(found.resource().bytes(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn vary_resolves_per_variant() {
        let cache = cache();
        let now = Utc::now();
        cache
            .create_entry(
                &target(),
                &head(&[("accept", "text/html")]),
                StatusCode::OK,
                response_headers(&[(VARY.as_str(), "Accept"), (ETAG.as_str(), "\"a\"")]),
                Bytes::from_static(b"html"),
                now,
                now,
            )
            .await
            .unwrap();
        cache
            .create_entry(
                &target(),
                &head(&[("accept", "application/json")]),
                StatusCode::OK,
                response_headers(&[(VARY.as_str(), "Accept"), (ETAG.as_str(), "\"b\"")]),
                Bytes::from_static(b"json"),
                now,
                now,
            )
            .await
            .unwrap();

        let html = cache
            .get(&target(), &head(&[("accept", "text/html")]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(html.resource().bytes(), Bytes::from_static(b"html"));
        let json = cache
            .get(&target(), &head(&[("accept", "application/json")]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(json.resource().bytes(), Bytes::from_static(b"json"));
        assert!(cache
            .get(&target(), &head(&[("accept", "image/png")]))
            .await
            .unwrap()
            .is_none());

        let variants = cache.variants_with_etags(&target(), &head(&[])).await.unwrap();
        assert_eq!(variants.len(), 2);
        assert!(variants.contains_key("\"a\""));
        assert!(variants.contains_key("\"b\""));
    }

    #[tokio::test]
    async fn update_merges_end_to_end_headers_only() {
        let cache = cache();
        let now = Utc::now();
        let entry = cache
            .create_entry(
                &target(),
                &head(&[]),
                StatusCode::OK,
                response_headers(&[("cache-control", "max-age=10"), ("content-type", "text/plain")]),
                Bytes::from_static(b"abc"),
                now,
                now,
            )
            .await
            .unwrap();

        let mut merge = HeaderMap::new();
        merge.insert(DATE, fmt_http_date(now + chrono::Duration::seconds(60)));
        merge.insert("cache-control", HeaderValue::from_static("max-age=120"));
        merge.insert(CONNECTION, HeaderValue::from_static("close"));
        merge.insert(CONTENT_LENGTH, HeaderValue::from_static("999"));

        let updated = cache
            .update_entry(&target(), &head(&[]), &entry, &merge, now, now)
            .await
            .unwrap();
        assert_eq!(
            updated.headers().get("cache-control").unwrap(),
            "max-age=120"
        );
        assert_eq!(updated.headers().get("content-type").unwrap(), "text/plain");
        assert!(updated.headers().get(CONNECTION).is_none());
        assert!(updated.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(updated.resource().bytes(), Bytes::from_static(b"abc"));

        let found = cache.get(&target(), &head(&[])).await.unwrap().unwrap();
        assert_eq!(found.headers().get("cache-control").unwrap(), "max-age=120");
    }

    #[tokio::test]
    async fn merge_drops_1xx_warnings() {
        let cache = cache();
        let now = Utc::now();
        let entry = cache
            .create_entry(
                &target(),
                &head(&[]),
                StatusCode::OK,
                response_headers(&[(WARNING.as_str(), "110 localhost \"Response is stale\"")]),
                Bytes::new(),
                now,
                now,
            )
            .await
            .unwrap();
        let updated = cache
            .update_entry(&target(), &head(&[]), &entry, &HeaderMap::new(), now, now)
            .await
            .unwrap();
        assert!(updated.headers().get(WARNING).is_none());
    }

    #[tokio::test]
    async fn unsafe_request_flushes_entry_and_variants() {
        let cache = cache();
        let now = Utc::now();
        cache
            .create_entry(
                &target(),
                &head(&[("accept", "text/html")]),
                StatusCode::OK,
                response_headers(&[(VARY.as_str(), "Accept"), (ETAG.as_str(), "\"a\"")]),
                Bytes::from_static(b"html"),
                now,
                now,
            )
            .await
            .unwrap();

        let mut post = head(&[]);
        post.method = Method::POST;
        cache
            .flush_invalidated_by_request(&target(), &post)
            .await
            .unwrap();
        assert!(cache.storage().is_empty());
    }

    #[tokio::test]
    async fn location_invalidation_respects_newer_entry() {
        let cache = cache();
        let now = Utc::now();
        cache
            .create_entry(
                &target(),
                &head(&[]),
                StatusCode::OK,
                response_headers(&[]),
                Bytes::from_static(b"abc"),
                now,
                now,
            )
            .await
            .unwrap();

        // Response older than the stored entry must not invalidate it.
        let mut stale_response = HeaderMap::new();
        stale_response.insert(DATE, fmt_http_date(now - chrono::Duration::seconds(3600)));
        stale_response.insert(LOCATION, HeaderValue::from_static("http://example.com/x"));
        let mut post = head(&[]);
        post.method = Method::POST;
        post.uri = "http://example.com/submit".parse().unwrap();
        cache
            .flush_invalidated_by_response(&target(), &post, StatusCode::CREATED, &stale_response)
            .await
            .unwrap();
        assert!(cache.get(&target(), &head(&[])).await.unwrap().is_some());

        let mut fresh_response = HeaderMap::new();
        fresh_response.insert(DATE, fmt_http_date(now + chrono::Duration::seconds(3600)));
        fresh_response.insert(LOCATION, HeaderValue::from_static("http://example.com/x"));
        cache
            .flush_invalidated_by_response(&target(), &post, StatusCode::CREATED, &fresh_response)
            .await
            .unwrap();
        assert!(cache.get(&target(), &head(&[])).await.unwrap().is_none());
    }
}
