use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::sanitize::is_cacheable_query;

const SHORT_TTL_KEYWORDS: &[&str] =
    &["price", "nav", "market", "yield", "rate", "today", "latest", "current"];

const LONG_TTL_KEYWORDS: &[&str] = &["what is", "explain", "how does", "define"];

/// Freshness class assigned to a cached answer. Live, price-like queries go
/// stale fast; explanatory answers stay useful much longer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtlClass {
    Short,
    Long,
    Default,
}

impl TtlClass {
    /// Keyword heuristic over the normalized query. Short-lived markers win
    /// over explanatory ones: "what is the current NAV" is a live query.
    pub fn classify(query: &str) -> Self {
        let lowered = query.to_lowercase();
        if SHORT_TTL_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
            return Self::Short;
        }
        if LONG_TTL_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
            return Self::Long;
        }
        Self::Default
    }
}

/// Snapshot of cache bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
}

struct CacheEntry {
    value: String,
    created_at: DateTime<Utc>,
    ttl_class: TtlClass,
    hit_count: u64,
}

/// TTL-keyed store of prior answers.
///
/// Keys combine the normalized query with an optional hash of the volatile
/// external context the answer was grounded in; requester identity is
/// deliberately absent, so answers are shared across all requesters. Entries
/// are evicted by size bound (oldest creation first) or lazily by age at
/// read time.
pub struct ResponseCache {
    max_entries: usize,
    short_ttl: Duration,
    long_ttl: Duration,
    default_ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: Mutex<u64>,
}

impl ResponseCache {
    pub fn new(
        max_entries: usize,
        short_ttl: Duration,
        long_ttl: Duration,
        default_ttl: Duration,
    ) -> Self {
        Self {
            max_entries,
            short_ttl,
            long_ttl,
            default_ttl,
            entries: Mutex::new(HashMap::new()),
            hits: Mutex::new(0),
        }
    }

    fn ttl(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Short => self.short_ttl,
            TtlClass::Long => self.long_ttl,
            TtlClass::Default => self.default_ttl,
        }
    }

    pub fn lookup(&self, query: &str, context_hash: Option<&str>) -> Option<String> {
        self.lookup_at(query, context_hash, Utc::now())
    }

    /// Returns the cached answer only while it is younger than its class TTL;
    /// a stale entry is removed and treated as absent.
    pub fn lookup_at(
        &self,
        query: &str,
        context_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let key = cache_key(query, context_hash);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get_mut(&key)?;

        let age = (now - entry.created_at).to_std().unwrap_or(Duration::ZERO);
        if age >= self.ttl(entry.ttl_class) {
            entries.remove(&key);
            return None;
        }

        entry.hit_count += 1;
        *self.hits.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Some(entry.value.clone())
    }

    pub fn store(&self, query: &str, value: &str, context_hash: Option<&str>) -> bool {
        self.store_at(query, value, context_hash, Utc::now())
    }

    /// Stores an answer unless the query is non-cacheable. On overflow the
    /// single oldest entry by creation time makes room.
    pub fn store_at(
        &self,
        query: &str,
        value: &str,
        context_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        if !is_cacheable_query(query) {
            return false;
        }

        let key = cache_key(query, context_hash);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value: value.to_owned(),
                created_at: now,
                ttl_class: TtlClass::classify(query),
                hit_count: 0,
            },
        );
        true
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.lock().unwrap_or_else(PoisonError::into_inner).len(),
            hits: *self.hits.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Normalized cache key. No requester identity component: answers are shared
/// across requesters by design.
fn cache_key(query: &str, context_hash: Option<&str>) -> String {
    let normalized = query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['?', '!', '.'])
        .to_owned();

    match context_hash {
        Some(hash) => format!("{normalized}:{hash}"),
        None => normalized,
    }
}

/// Hash of the volatile external context an answer depends on. Answers
/// grounded in different context never share a cache slot.
pub fn context_hash(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    hasher.finalize().to_hex()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::{cache_key, context_hash, ResponseCache, TtlClass};

    fn cache() -> ResponseCache {
        ResponseCache::new(
            3,
            Duration::from_secs(60),
            Duration::from_secs(3_600),
            Duration::from_secs(300),
        )
    }

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid timestamp")
    }

    #[test]
    fn classification_uses_keyword_heuristics() {
        assert_eq!(TtlClass::classify("latest NAV per share"), TtlClass::Short);
        assert_eq!(TtlClass::classify("explain our fee structure"), TtlClass::Long);
        assert_eq!(TtlClass::classify("quarterly investor letter status"), TtlClass::Default);
        // Live markers win over explanatory phrasing.
        assert_eq!(TtlClass::classify("what is the current NAV"), TtlClass::Short);
    }

    #[test]
    fn fresh_entry_is_returned_unchanged() {
        let cache = cache();
        let now = start();

        assert!(cache.store_at("quarterly redemption total", "42", None, now));
        let hit = cache.lookup_at("quarterly redemption total", None, now + chrono::Duration::seconds(299));
        assert_eq!(hit.as_deref(), Some("42"));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn stale_entry_is_removed_at_read_time() {
        let cache = cache();
        let now = start();

        cache.store_at("quarterly redemption total", "42", None, now);
        let miss = cache.lookup_at("quarterly redemption total", None, now + chrono::Duration::seconds(300));
        assert_eq!(miss, None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn key_normalization_folds_case_whitespace_and_punctuation() {
        assert_eq!(cache_key("What's  our AUM?", None), cache_key("what's our aum", None));
    }

    #[test]
    fn context_hash_separates_entries() {
        let cache = cache();
        let now = start();
        let hash_a = context_hash(&["aum=125.0"]);
        let hash_b = context_hash(&["aum=126.4"]);
        assert_ne!(hash_a, hash_b);

        cache.store_at("what is our assets total", "125", Some(&hash_a), now);
        assert_eq!(cache.lookup_at("what is our assets total", Some(&hash_b), now), None);
        assert_eq!(
            cache.lookup_at("what is our assets total", Some(&hash_a), now).as_deref(),
            Some("125")
        );
    }

    #[test]
    fn overflow_evicts_the_single_oldest_entry() {
        let cache = cache();
        let now = start();

        cache.store_at("question number one here", "1", None, now);
        cache.store_at("question number two here", "2", None, now + chrono::Duration::seconds(1));
        cache.store_at("question number three here", "3", None, now + chrono::Duration::seconds(2));
        cache.store_at("question number four here", "4", None, now + chrono::Duration::seconds(3));

        assert_eq!(cache.stats().entries, 3);
        assert_eq!(cache.lookup_at("question number one here", None, now + chrono::Duration::seconds(4)), None);
        assert!(cache.lookup_at("question number two here", None, now + chrono::Duration::seconds(4)).is_some());
    }

    #[test]
    fn non_cacheable_queries_are_refused() {
        let cache = cache();
        assert!(!cache.store_at("aum?", "42", None, start()));
        assert!(!cache.store_at("what is the NAV right now", "42", None, start()));
        assert_eq!(cache.stats().entries, 0);
    }
}
