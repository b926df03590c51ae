//! Entry suitability: does this stored entry satisfy this request right now.

use chrono::{DateTime, Utc};
use http::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH};
use tracing::debug;

use crate::entry::CacheEntry;
use crate::headers::{CacheControl, etag_matches_weak, parse_http_date, split_etag_list};
use crate::key::variant_key;
use crate::policy::ValidityPolicy;
use crate::request::RequestHead;

/// Decides whether a specific stored entry can answer a specific request
/// without contacting the origin.
#[derive(Debug, Clone, Copy)]
pub struct SuitabilityChecker {
    validity: ValidityPolicy,
    shared: bool,
}

impl SuitabilityChecker {
    pub fn new(validity: ValidityPolicy, shared: bool) -> Self {
        SuitabilityChecker { validity, shared }
    }

    /// True when `entry` may be returned for `request` at `now`.
    pub fn can_use(&self, request: &RequestHead, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        if *entry.request_method() != request.method {
            return false;
        }

        if !self.varying_headers_match(request, entry) {
            debug!("Varying request headers do not match the stored variant");
            return false;
        }

        let request_cc = CacheControl::from_headers(&request.headers);
        if request_cc.no_cache {
            return false;
        }

        let age = self.validity.age_secs(entry, now);
        let lifetime = self.validity.freshness_lifetime_secs(entry);
        let staleness = age.saturating_sub(lifetime);

        if let Some(max_age) = request_cc.max_age {
            if age > max_age {
                return false;
            }
        }
        if let Some(min_fresh) = request_cc.min_fresh {
            if lifetime.saturating_sub(age) < min_fresh {
                return false;
            }
        }

        if age < lifetime {
            return true;
        }

        // Stale. Only an explicit max-stale tolerance permits reuse, and
        // revalidation directives on the entry override it.
        let tolerated = match request_cc.max_stale {
            Some(None) => true,
            Some(Some(limit)) => staleness <= limit,
            None => false,
        };
        if !tolerated {
            return false;
        }
        if self.validity.must_revalidate(entry) {
            return false;
        }
        if self.shared && self.validity.proxy_revalidate(entry) {
            return false;
        }
        true
    }

    fn varying_headers_match(&self, request: &RequestHead, entry: &CacheEntry) -> bool {
        let vary = entry.vary_names();
        if vary.is_empty() {
            return true;
        }
        match entry.variant_key() {
            Some(stored) => variant_key(&vary, &request.headers) == stored,
            None => false,
        }
    }

    /// The request carries validator preconditions eligible for a 304.
    pub fn is_conditional(&self, request: &RequestHead) -> bool {
        request.headers.contains_key(IF_NONE_MATCH)
            || request.headers.contains_key(IF_MODIFIED_SINCE)
    }

    /// Evaluates the request's conditionals against `entry`.
    ///
    /// All present conditionals must match: `If-None-Match` under weak
    /// entity tag comparison, `If-Modified-Since` at one-second resolution.
    pub fn all_conditionals_match(
        &self,
        request: &RequestHead,
        entry: &CacheEntry,
        now: DateTime<Utc>,
    ) -> bool {
        let has_inm = request.headers.contains_key(IF_NONE_MATCH);
        let has_ims = request.headers.contains_key(IF_MODIFIED_SINCE);

        if has_inm && !self.etag_validator_matches(request, entry) {
            return false;
        }
        if has_ims && !self.last_modified_validator_matches(request, entry, now) {
            return false;
        }
        has_inm || has_ims
    }

    fn etag_validator_matches(&self, request: &RequestHead, entry: &CacheEntry) -> bool {
        let entry_tag = match entry.etag().and_then(|v| v.to_str().ok()) {
            Some(tag) => tag,
            None => return false,
        };
        request
            .headers
            .get_all(IF_NONE_MATCH)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(split_etag_list)
            .any(|tag| tag == "*" || etag_matches_weak(tag, entry_tag))
    }

    fn last_modified_validator_matches(
        &self,
        request: &RequestHead,
        entry: &CacheEntry,
        now: DateTime<Utc>,
    ) -> bool {
        let if_modified_since = match request
            .headers
            .get(IF_MODIFIED_SINCE)
            .and_then(parse_http_date)
        {
            Some(date) => date,
            None => return false,
        };
        if if_modified_since > now {
            return false;
        }
        match entry.last_modified() {
            Some(last_modified) => last_modified.timestamp() <= if_modified_since.timestamp(),
            None => false,
        }
    }
}
