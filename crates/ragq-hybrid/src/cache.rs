//! Answer cache keyed by query fingerprint.
//!
//! Built on moka's async cache. `entry().or_try_insert_with` gives
//! single-flight semantics: concurrent callers for one fingerprint await the
//! same computation, and a failure reaches every waiter without being stored.
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use tracing::{debug, info};

use ragq_core::config::CacheConfig;
use ragq_core::error::QueryError;
use ragq_core::types::{AnsweredQuery, QueryFingerprint};

const NO_VERSION_SEEN: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

pub struct AnswerCache {
    entries: Option<Cache<QueryFingerprint, Arc<AnsweredQuery>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    corpus_version: AtomicU64,
}

impl AnswerCache {
    pub fn new(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();
        Self::with_entries(Some(entries))
    }

    /// Pass-through: every call computes.
    pub fn disabled() -> Self {
        Self::with_entries(None)
    }

    fn with_entries(entries: Option<Cache<QueryFingerprint, Arc<AnsweredQuery>>>) -> Self {
        Self { entries, hits: AtomicU64::new(0), misses: AtomicU64::new(0), corpus_version: AtomicU64::new(NO_VERSION_SEEN) }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Drop every entry when the corpus version differs from the last one seen.
    pub fn observe_corpus_version(&self, version: u64) {
        let previous = self.corpus_version.swap(version, Ordering::AcqRel);
        if previous != version && previous != NO_VERSION_SEEN {
            if let Some(entries) = &self.entries {
                entries.invalidate_all();
            }
            info!(previous, current = version, "corpus version changed; answer cache invalidated");
        }
    }

    pub async fn get_or_compute<F>(&self, fingerprint: QueryFingerprint, compute: F) -> Result<Arc<AnsweredQuery>, QueryError>
    where
        F: Future<Output = Result<AnsweredQuery, QueryError>>,
    {
        let Some(entries) = &self.entries else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return compute.await.map(Arc::new);
        };
        let entry = entries
            .entry(fingerprint)
            .or_try_insert_with(async { compute.await.map(Arc::new) })
            .await
            .map_err(|e: Arc<QueryError>| e.as_ref().clone())?;
        if entry.is_fresh() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %entry.key(), "answer cache miss");
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %entry.key(), "answer cache hit");
        }
        Ok(entry.into_value())
    }

    pub async fn invalidate_all(&self) {
        if let Some(entries) = &self.entries {
            entries.invalidate_all();
            entries.run_pending_tasks().await;
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.as_ref().map_or(0, Cache::entry_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragq_core::types::{Attribution, Confidence};
    use std::sync::atomic::AtomicUsize;

    fn answer(text: &str) -> AnsweredQuery {
        AnsweredQuery {
            query: "q".into(),
            answer: text.into(),
            citations: vec![],
            claims: vec![],
            attribution: Attribution::Fallback,
            confidence: Confidence::Medium,
            warnings: vec![],
            corpus_version: 1,
            fingerprint: QueryFingerprint::compute("q", &Default::default(), 10, "v", 1),
        }
    }

    fn fp(q: &str) -> QueryFingerprint {
        QueryFingerprint::compute(q, &Default::default(), 10, "v", 1)
    }

    #[tokio::test]
    async fn second_lookup_is_a_hit() {
        let cache = AnswerCache::new(&CacheConfig::default());
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let got = cache
                .get_or_compute(fp("a"), async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(answer("x"))
                })
                .await
                .expect("answer");
            assert_eq!(got.answer, "x");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = AnswerCache::new(&CacheConfig::default());
        let err = cache
            .get_or_compute(fp("a"), async { Err(QueryError::NoRelevantContext("none".into())) })
            .await
            .unwrap_err();
        assert_eq!(err, QueryError::NoRelevantContext("none".into()));
        let ok = cache.get_or_compute(fp("a"), async { Ok(answer("later")) }).await.expect("answer");
        assert_eq!(ok.answer, "later");
    }

    #[tokio::test]
    async fn disabled_cache_always_computes() {
        let cache = AnswerCache::disabled();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            cache
                .get_or_compute(fp("a"), async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(answer("x"))
                })
                .await
                .expect("answer");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 3, entries: 0 });
    }

    #[tokio::test]
    async fn corpus_version_change_clears_entries() {
        let cache = AnswerCache::new(&CacheConfig::default());
        cache.observe_corpus_version(1);
        cache.get_or_compute(fp("a"), async { Ok(answer("old")) }).await.expect("answer");
        cache.observe_corpus_version(1);
        let same = cache.get_or_compute(fp("a"), async { Ok(answer("new")) }).await.expect("answer");
        assert_eq!(same.answer, "old");

        cache.observe_corpus_version(2);
        let fresh = cache.get_or_compute(fp("a"), async { Ok(answer("new")) }).await.expect("answer");
        assert_eq!(fresh.answer, "new");
    }
}
