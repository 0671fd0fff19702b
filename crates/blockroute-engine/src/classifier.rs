//! Intent classification collaborator.
//!
//! The engine does not classify text itself.  When an event arrives with
//! text but without intents, the coordinator asks an [`IntentClassifier`]
//! for a ranked list.  [`CachedClassifier`] puts a [`moka`] cache in front
//! of any classifier so repeated phrases ("hi", "menu") are classified once.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use blockroute_core::IntentScore;
use moka::future::Cache;
use tracing::debug;

use crate::error::Result;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Produces a ranked intent list for a piece of text.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Intents ordered by descending confidence.  An empty list means
    /// nothing was recognized and is not an error.
    async fn classify(&self, text: &str) -> Result<Vec<IntentScore>>;
}

// ---------------------------------------------------------------------------
// Cache stats
// ---------------------------------------------------------------------------

/// Hit/miss counters of a [`CachedClassifier`].
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate between 0.0 and 1.0 (0.0 before the first lookup).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.hit_rate() * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Cached classifier
// ---------------------------------------------------------------------------

/// An [`IntentClassifier`] decorator backed by `moka::future::Cache`.
///
/// Keys are the trimmed text.  Failures are never cached.
pub struct CachedClassifier<C> {
    inner: C,
    cache: Cache<String, Arc<Vec<IntentScore>>>,
    stats: Arc<CacheStats>,
}

impl<C: IntentClassifier> CachedClassifier<C> {
    pub fn new(inner: C, max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self {
            inner,
            cache,
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Drop every cached classification, e.g. after the model changed.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl<C: IntentClassifier> IntentClassifier for CachedClassifier<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn classify(&self, text: &str) -> Result<Vec<IntentScore>> {
        let key = text.trim();
        if let Some(hit) = self.cache.get(key).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(classifier = self.inner.name(), text = key, "classifier cache hit");
            return Ok(hit.as_ref().clone());
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let intents = self.inner.classify(key).await?;
        self.cache
            .insert(key.to_string(), Arc::new(intents.clone()))
            .await;
        debug!(
            classifier = self.inner.name(),
            text = key,
            intents = intents.len(),
            "classifier cache miss"
        );
        Ok(intents)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    struct Counting {
        calls: AtomicU64,
    }

    #[async_trait]
    impl IntentClassifier for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn classify(&self, text: &str) -> Result<Vec<IntentScore>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text == "boom" {
                return Err(EngineError::Classifier {
                    reason: "model unavailable".into(),
                });
            }
            Ok(vec![IntentScore::new("greet", 0.9)])
        }
    }

    fn cached() -> CachedClassifier<Counting> {
        CachedClassifier::new(
            Counting {
                calls: AtomicU64::new(0),
            },
            16,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn repeated_text_hits_the_cache() {
        let classifier = cached();
        let first = classifier.classify("hello").await.unwrap();
        let second = classifier.classify("  hello ").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(classifier.inner().calls.load(Ordering::SeqCst), 1);
        assert_eq!(classifier.stats().hits(), 1);
        assert_eq!(classifier.stats().misses(), 1);
        assert!(classifier.stats().to_string().contains("rate=50.00%"));
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let classifier = cached();
        assert!(classifier.classify("boom").await.is_err());
        assert!(classifier.classify("boom").await.is_err());
        assert_eq!(classifier.inner().calls.load(Ordering::SeqCst), 2);
    }
}
