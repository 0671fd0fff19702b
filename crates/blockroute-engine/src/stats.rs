//! Engine counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock-free counters updated by the coordinator.
#[derive(Debug, Default)]
pub struct EngineStats {
    resolutions: AtomicU64,
    matched: AtomicU64,
    no_match: AtomicU64,
    skipped_evaluations: AtomicU64,
    reindexes: AtomicU64,
    reindex_failures: AtomicU64,
    classifier_failures: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub resolutions: u64,
    pub matched: u64,
    pub no_match: u64,
    pub skipped_evaluations: u64,
    pub reindexes: u64,
    pub reindex_failures: u64,
    pub classifier_failures: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_resolution(&self, matched: bool, skipped: usize) {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        if matched {
            self.matched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.no_match.fetch_add(1, Ordering::Relaxed);
        }
        self.skipped_evaluations
            .fetch_add(skipped as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_reindex(&self, ok: bool) {
        if ok {
            self.reindexes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reindex_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_classifier_failure(&self) {
        self.classifier_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            resolutions: self.resolutions.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            no_match: self.no_match.load(Ordering::Relaxed),
            skipped_evaluations: self.skipped_evaluations.load(Ordering::Relaxed),
            reindexes: self.reindexes.load(Ordering::Relaxed),
            reindex_failures: self.reindex_failures.load(Ordering::Relaxed),
            classifier_failures: self.classifier_failures.load(Ordering::Relaxed),
        }
    }

    /// Share of resolutions that selected a block, in `[0, 1]` (0.0 before
    /// the first resolution).
    pub fn match_rate(&self) -> f64 {
        let total = self.resolutions.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.matched.load(Ordering::Relaxed) as f64 / total as f64
    }
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.snapshot();
        write!(
            f,
            "resolutions={} matched={} no_match={} skipped={} reindexes={} reindex_failures={} rate={:.2}%",
            s.resolutions,
            s.matched,
            s.no_match,
            s.skipped_evaluations,
            s.reindexes,
            s.reindex_failures,
            self.match_rate() * 100.0,
        )
    }
}
