//! Age, freshness, and staleness arithmetic for stored entries.

use chrono::{DateTime, Utc};
use http::HeaderMap;
use http::header::{AGE, DATE, EXPIRES};

use crate::entry::CacheEntry;
use crate::headers::{CacheControl, MAX_AGE_SECS, parse_http_date};

/// Computes validity of stored entries per the HTTP caching rules.
#[derive(Debug, Clone, Copy)]
pub struct ValidityPolicy {
    shared: bool,
}

impl ValidityPolicy {
    pub fn new(shared: bool) -> Self {
        ValidityPolicy { shared }
    }

    /// Current age of `entry` in seconds at `now`.
    ///
    /// corrected_initial_age + resident_time, where the corrected initial
    /// age folds in the `Age` header and the response delay. An absent or
    /// unparseable `Date` makes the entry infinitely old.
    pub fn age_secs(&self, entry: &CacheEntry, now: DateTime<Utc>) -> u64 {
        let apparent = match entry.date() {
            Some(date) => delta_secs(date, entry.response_received()),
            None => MAX_AGE_SECS,
        };
        let corrected_received = apparent.max(self.age_header_secs(entry.headers()));
        let response_delay = delta_secs(entry.request_sent(), entry.response_received());
        let corrected_initial = corrected_received.saturating_add(response_delay);
        let resident = delta_secs(entry.response_received(), now);
        corrected_initial.saturating_add(resident)
    }

    fn age_header_secs(&self, headers: &HeaderMap) -> u64 {
        let mut age = 0;
        for value in headers.get_all(AGE) {
            let parsed = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                // A malformed Age makes the entry look infinitely old.
                .unwrap_or(MAX_AGE_SECS);
            age = age.max(parsed);
        }
        age
    }

    /// Freshness lifetime of `entry` in seconds.
    ///
    /// `s-maxage` (shared caches only), else `max-age`, else the
    /// `Expires` − `Date` interval. Zero when nothing applies.
    pub fn freshness_lifetime_secs(&self, entry: &CacheEntry) -> u64 {
        let cc = entry.cache_control();
        if self.shared {
            if let Some(s_maxage) = cc.s_maxage {
                return s_maxage;
            }
        }
        if let Some(max_age) = cc.max_age {
            return max_age;
        }
        let expires = entry.headers().get(EXPIRES).and_then(parse_http_date);
        let date = entry.headers().get(DATE).and_then(parse_http_date);
        match (expires, date) {
            (Some(expires), Some(date)) => delta_secs(date, expires),
            _ => 0,
        }
    }

    /// Seconds by which `entry` exceeds its freshness lifetime at `now`.
    pub fn staleness_secs(&self, entry: &CacheEntry, now: DateTime<Utc>) -> u64 {
        self.age_secs(entry, now)
            .saturating_sub(self.freshness_lifetime_secs(entry))
    }

    /// True while the entry is within its freshness lifetime.
    pub fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.age_secs(entry, now) < self.freshness_lifetime_secs(entry)
    }

    /// The stored response demands revalidation once stale.
    pub fn must_revalidate(&self, entry: &CacheEntry) -> bool {
        entry.cache_control().must_revalidate
    }

    /// The stored response demands revalidation by shared caches once stale.
    pub fn proxy_revalidate(&self, entry: &CacheEntry) -> bool {
        entry.cache_control().proxy_revalidate
    }

    /// `stale-while-revalidate` permits serving this entry while a
    /// background revalidation runs.
    pub fn may_return_stale_while_revalidating(
        &self,
        entry: &CacheEntry,
        now: DateTime<Utc>,
    ) -> bool {
        match entry.cache_control().stale_while_revalidate {
            Some(window) => self.staleness_secs(entry, now) <= window,
            None => false,
        }
    }

    /// `stale-if-error` (in the request or the stored response) permits
    /// serving this entry in place of an origin error.
    pub fn may_return_stale_if_error(
        &self,
        request_headers: &HeaderMap,
        entry: &CacheEntry,
        now: DateTime<Utc>,
    ) -> bool {
        let window = CacheControl::from_headers(request_headers)
            .stale_if_error
            .or(entry.cache_control().stale_if_error);
        match window {
            Some(window) => self.staleness_secs(entry, now) <= window,
            None => false,
        }
    }
}

/// Non-negative whole seconds from `earlier` to `later`.
fn delta_secs(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    later
        .signed_duration_since(earlier)
        .num_seconds()
        .max(0) as u64
}
