use super::InsightBundle;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest lifetime of a cached bundle
pub const MAX_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

struct CachedBundle {
    bundle: Arc<InsightBundle>,
    expires_at: Instant,
}

/// Insight bundles keyed by summary hash, each with its own expiry
#[derive(Default)]
pub struct InsightCache {
    entries: HashMap<String, CachedBundle>,
}

impl InsightCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached bundle if it has not expired.
    pub fn get(&self, summary_hash: &str) -> Option<Arc<InsightBundle>> {
        self.entries.get(summary_hash).and_then(|e| {
            if Instant::now() < e.expires_at {
                Some(e.bundle.clone())
            } else {
                None
            }
        })
    }

    /// Insert or replace. TTLs above `MAX_TTL` are capped.
    pub fn put(&mut self, bundle: Arc<InsightBundle>, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl.min(MAX_TTL))
            .unwrap_or(now + Duration::from_secs(3600));
        self.entries.insert(
            bundle.summary_hash.clone(),
            CachedBundle { bundle, expires_at },
        );
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| now < e.expires_at);
        before - self.entries.len()
    }

    /// Live bundles, oldest first
    pub fn bundles(&self) -> Vec<Arc<InsightBundle>> {
        let now = Instant::now();
        let mut live: Vec<Arc<InsightBundle>> = self
            .entries
            .values()
            .filter(|e| now < e.expires_at)
            .map(|e| e.bundle.clone())
            .collect();
        live.sort_by(|a, b| {
            a.generated_at
                .cmp(&b.generated_at)
                .then_with(|| a.summary_hash.cmp(&b.summary_hash))
        });
        live
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::InsightSource;
    use chrono::Utc;

    fn bundle(hash: &str) -> Arc<InsightBundle> {
        Arc::new(InsightBundle {
            summary_hash: hash.to_string(),
            route: None,
            demand_insights: vec!["steady".to_string()],
            price_insights: Vec::new(),
            route_insights: Vec::new(),
            recommendations: Vec::new(),
            summary: String::new(),
            generated_at: Utc::now(),
            source: InsightSource::Fallback,
        })
    }

    #[test]
    fn entries_expire() {
        let mut cache = InsightCache::new();
        cache.put(bundle("a"), Duration::from_secs(60));
        cache.put(bundle("b"), Duration::ZERO);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert_eq!(cache.bundles().len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn put_replaces_existing() {
        let mut cache = InsightCache::new();
        cache.put(bundle("a"), Duration::ZERO);
        cache.put(bundle("a"), Duration::from_secs(60));
        assert!(cache.get("a").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn oversized_ttl_is_capped_not_expired() {
        let mut cache = InsightCache::new();
        cache.put(bundle("a"), Duration::MAX);
        assert!(cache.get("a").is_some());
        assert_eq!(cache.purge_expired(), 0);
    }
}
