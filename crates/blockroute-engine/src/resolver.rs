//! Resolution: pick the one block an event should run next.
//!
//! | Step | What happens                                                        |
//! |------|---------------------------------------------------------------------|
//! | 1    | Load one index snapshot and fetch the candidates for the scope.     |
//! | 2    | Per candidate, evaluate triggers in declared order; first match wins.|
//! | 3    | Collect every matching candidate.                                   |
//! | 4    | Winner: highest priority, then highest score, then index order.     |
//!
//! Resolution never fails.  A trigger whose evaluation raises an
//! [`EvaluationError`](blockroute_core::EvaluationError) counts as a
//! non-match and is recorded in [`ResolvedOutcome::skipped`].  Producing a
//! fallback when nothing matches is left to the caller.

use std::sync::Arc;

use blockroute_core::{Block, Event, ScopeDescriptor};
use serde::{Deserialize, Serialize};

use crate::context::ConversationContext;
use crate::index::{CandidateIndex, IndexSnapshot};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A matching candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub block_id: String,
    /// In `[0, 1]`.
    pub score: f64,
    pub priority: i32,
    /// Index of the block trigger that fired.
    pub trigger_index: usize,
    /// Indices of the patterns of that trigger which matched.
    pub matched_patterns: Vec<usize>,
    /// State the conversation should move to if this block runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_state: Option<String>,
}

/// A trigger that could not be evaluated and was treated as non-matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSkipped {
    pub block_id: String,
    pub trigger_index: usize,
    pub reason: String,
}

/// Result of one resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedOutcome {
    /// `None` means no candidate matched.
    pub winner: Option<MatchResult>,
    /// Candidates whose triggers were evaluated.
    pub evaluated_count: usize,
    /// Candidates that matched, winner included.
    pub match_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<EvaluationSkipped>,
    /// Version of the index snapshot this resolution ran against.
    pub index_version: u64,
}

impl ResolvedOutcome {
    pub fn winner_block_id(&self) -> Option<&str> {
        self.winner.as_ref().map(|w| w.block_id.as_str())
    }

    pub fn is_match(&self) -> bool {
        self.winner.is_some()
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Stateless resolver over a shared [`CandidateIndex`].
#[derive(Clone)]
pub struct Resolver {
    index: Arc<CandidateIndex>,
}

impl Resolver {
    pub fn new(index: Arc<CandidateIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<CandidateIndex> {
        &self.index
    }

    /// Resolve `event` in the scope of `context`.
    pub fn resolve(&self, context: &ConversationContext, event: &Event) -> ResolvedOutcome {
        let snapshot = self.index.snapshot();
        resolve_in(&snapshot, &context.scope_for(event), event)
    }
}

/// Resolve against a specific snapshot.
pub fn resolve_in(snapshot: &IndexSnapshot, scope: &ScopeDescriptor, event: &Event) -> ResolvedOutcome {
    let candidates = snapshot.candidates_for(scope);
    let mut outcome = ResolvedOutcome {
        evaluated_count: candidates.len(),
        index_version: snapshot.version(),
        ..ResolvedOutcome::default()
    };

    for block in &candidates {
        let Some(hit) = evaluate_block(block, event, &mut outcome.skipped) else {
            continue;
        };
        outcome.match_count += 1;

        // Candidates arrive by descending priority then index order, so a
        // later candidate only wins on a strictly better key.
        let better = match &outcome.winner {
            None => true,
            Some(best) => {
                hit.priority > best.priority
                    || (hit.priority == best.priority && hit.score > best.score)
            }
        };
        if better {
            outcome.winner = Some(hit);
        }
    }

    match &outcome.winner {
        Some(winner) => tracing::debug!(
            state = %scope.state,
            block_id = %winner.block_id,
            score = winner.score,
            evaluated = outcome.evaluated_count,
            matched = outcome.match_count,
            "resolved"
        ),
        None => tracing::debug!(
            state = %scope.state,
            evaluated = outcome.evaluated_count,
            "no block matched"
        ),
    }
    outcome
}

/// First matching trigger of `block`, if any.
fn evaluate_block(
    block: &Block,
    event: &Event,
    skipped: &mut Vec<EvaluationSkipped>,
) -> Option<MatchResult> {
    for (trigger_index, trigger) in block.triggers.iter().enumerate() {
        match trigger.evaluate(event) {
            Ok(result) if result.matched => {
                return Some(MatchResult {
                    block_id: block.id.clone(),
                    score: result.score,
                    priority: block.priority,
                    trigger_index,
                    matched_patterns: result.matched_patterns,
                    next_state: block.next_state.clone(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    block_id = %block.id,
                    trigger_index,
                    error = %e,
                    "trigger evaluation skipped"
                );
                skipped.push(EvaluationSkipped {
                    block_id: block.id.clone(),
                    trigger_index,
                    reason: e.to_string(),
                });
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
