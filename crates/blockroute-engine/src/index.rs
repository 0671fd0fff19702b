//! Candidate index.
//!
//! The index maps a conversation's [`ScopeDescriptor`] to the ordered list
//! of blocks eligible for matching.  It is built off to the side from a
//! [`FlowDef`] and published with a single atomic pointer swap
//! ([`ArcSwap`]), so a reader that loaded a snapshot keeps seeing exactly
//! that snapshot, old or new, for as long as it holds it.
//!
//! # Ordering
//!
//! Candidates come out by descending `priority`, then by authoring order.
//! The resolver relies on this order for its final tie-break.
//!
//! # Layout
//!
//! Blocks are stored once, already sorted.  For every state named by some
//! block's scope, the index precomputes the merged list of positions of
//! that state's blocks and the state-wildcard blocks; unknown states fall
//! back to the wildcard list.  Channel and locale are filtered at lookup
//! time, which preserves the precomputed order.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use blockroute_core::{
    Block, CompileOptions, CompileReport, Flow, FlowDef, InvalidTriggerPolicy, ScopeDescriptor,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable, fully built index.
#[derive(Debug)]
pub struct IndexSnapshot {
    flow_id: Option<String>,
    version: u64,
    built_at: DateTime<Utc>,
    /// Sorted by `(Reverse(priority), order)`.
    blocks: Vec<Arc<Block>>,
    by_state: HashMap<String, Vec<usize>>,
    wildcard: Vec<usize>,
}

impl IndexSnapshot {
    /// The index installed before any flow is published.
    pub fn empty() -> Self {
        Self {
            flow_id: None,
            version: 0,
            built_at: Utc::now(),
            blocks: Vec::new(),
            by_state: HashMap::new(),
            wildcard: Vec::new(),
        }
    }

    /// Build from a compiled flow.  Blocks without triggers are left out:
    /// they can never match.
    pub fn build(flow: Flow, version: u64) -> Self {
        let mut blocks: Vec<Block> = flow
            .blocks
            .into_iter()
            .filter(|b| !b.triggers.is_empty())
            .collect();
        blocks.sort_by_key(|b| (Reverse(b.priority), b.order));

        let mut by_state: HashMap<String, Vec<usize>> = HashMap::new();
        let mut wildcard = Vec::new();
        for (pos, block) in blocks.iter().enumerate() {
            if block.scope.is_state_wildcard() {
                wildcard.push(pos);
            } else {
                for state in &block.scope.states {
                    by_state.entry(state.clone()).or_default().push(pos);
                }
            }
        }
        for positions in by_state.values_mut() {
            positions.extend_from_slice(&wildcard);
            positions.sort_unstable();
            positions.dedup();
        }

        Self {
            flow_id: Some(flow.id),
            version,
            built_at: Utc::now(),
            blocks: blocks.into_iter().map(Arc::new).collect(),
            by_state,
            wildcard,
        }
    }

    /// Eligible blocks for `scope`, in resolution order.
    pub fn candidates_for(&self, scope: &ScopeDescriptor) -> Vec<Arc<Block>> {
        let positions = self.by_state.get(&scope.state).unwrap_or(&self.wildcard);
        positions
            .iter()
            .map(|&pos| &self.blocks[pos])
            .filter(|block| block.scope.accepts_audience(scope))
            .cloned()
            .collect()
    }

    pub fn flow_id(&self) -> Option<&str> {
        self.flow_id.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Number of indexed blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// States explicitly named by indexed blocks, sorted.
    pub fn states(&self) -> Vec<&str> {
        let mut states: Vec<&str> = self.by_state.keys().map(String::as_str).collect();
        states.sort_unstable();
        states
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// Summary of a successful reindex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexReport {
    pub flow_id: String,
    pub version: u64,
    pub indexed_blocks: usize,
    pub compile: CompileReport,
}

/// The live candidate index.
///
/// Reads are wait-free snapshot loads.  [`CandidateIndex::reindex`] is the
/// only mutator; concurrent reindexes are serialized so versions are
/// published in order.
pub struct CandidateIndex {
    current: ArcSwap<IndexSnapshot>,
    next_version: AtomicU64,
    writer: Mutex<()>,
}

impl CandidateIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(IndexSnapshot::empty()),
            next_version: AtomicU64::new(1),
            writer: Mutex::new(()),
        }
    }

    /// The currently installed snapshot.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.load_full()
    }

    /// Shortcut for `snapshot().candidates_for(scope)`.
    pub fn candidates_for(&self, scope: &ScopeDescriptor) -> Vec<Arc<Block>> {
        self.current.load().candidates_for(scope)
    }

    /// Compile `def`, build a new snapshot and swap it in.
    ///
    /// On any failure the installed snapshot is left untouched and
    /// [`EngineError::ReindexFailure`] is returned.
    pub fn reindex(
        &self,
        def: &FlowDef,
        options: &CompileOptions,
        policy: InvalidTriggerPolicy,
    ) -> Result<ReindexReport> {
        let (flow, compile) =
            Flow::compile(def, options, policy).map_err(|e| EngineError::ReindexFailure {
                flow_id: def.id.clone(),
                reason: e.to_string(),
            })?;

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let snapshot = IndexSnapshot::build(flow, version);
        let indexed_blocks = snapshot.len();

        self.current.store(Arc::new(snapshot));

        tracing::info!(
            flow_id = %def.id,
            version,
            indexed_blocks,
            dropped_triggers = compile.dropped_triggers.len(),
            "candidate index installed"
        );

        Ok(ReindexReport {
            flow_id: def.id.clone(),
            version,
            indexed_blocks,
            compile,
        })
    }
}

impl Default for CandidateIndex {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
