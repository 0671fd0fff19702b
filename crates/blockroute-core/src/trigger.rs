//! Triggers: ordered patterns plus a match mode.
//!
//! A trigger belongs to exactly one block.  Its patterns are evaluated in
//! declared order; [`MatchMode`] decides how their outcomes combine.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, EvaluationError, Result};
use crate::event::Event;
use crate::matcher::{self, MatchOutcome};
use crate::pattern::{CompileOptions, Pattern, PatternDef, PatternSource};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How the outcomes of a trigger's patterns combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Fires on the first matching pattern.
    #[default]
    MatchAny,
    /// Fires only when every pattern matches; score is the weakest one.
    MatchAll,
}

/// Persisted trigger definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDef {
    #[serde(default)]
    pub mode: MatchMode,
    pub patterns: Vec<PatternSource>,
}

impl TriggerDef {
    pub fn new(mode: MatchMode, patterns: Vec<PatternDef>) -> Self {
        Self {
            mode,
            patterns: patterns.into_iter().map(PatternSource::from).collect(),
        }
    }

    pub fn any(patterns: Vec<PatternDef>) -> Self {
        Self::new(MatchMode::MatchAny, patterns)
    }

    pub fn all(patterns: Vec<PatternDef>) -> Self {
        Self::new(MatchMode::MatchAll, patterns)
    }
}

/// Outcome of evaluating a whole trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub matched: bool,
    pub score: f64,
    /// Indices of the patterns that matched, in declared order.
    pub matched_patterns: Vec<usize>,
}

impl TriggerOutcome {
    fn no_match(matched_patterns: Vec<usize>) -> Self {
        Self {
            matched: false,
            score: 0.0,
            matched_patterns,
        }
    }
}

/// A compiled trigger.
#[derive(Debug, Clone)]
pub struct Trigger {
    mode: MatchMode,
    patterns: Vec<Pattern>,
}

// ---------------------------------------------------------------------------
// Implementation
// ---------------------------------------------------------------------------

impl Trigger {
    /// Compile every pattern of a definition.
    ///
    /// Fails on the first malformed pattern, or when the definition has no
    /// patterns at all.
    pub fn compile(def: &TriggerDef, options: &CompileOptions) -> Result<Self> {
        if def.patterns.is_empty() {
            return Err(CoreError::EmptyTrigger);
        }
        let patterns = def
            .patterns
            .iter()
            .map(|source| Pattern::compile_source(source, options))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            mode: def.mode,
            patterns,
        })
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// Evaluate the trigger against an event.
    ///
    /// `MatchAny` stops at the first matching pattern.  A pattern that
    /// raises an [`EvaluationError`] does not stop it; the first error is
    /// returned only when no later pattern matches.  `MatchAll` always
    /// evaluates every pattern so diagnostics see every failure, and returns
    /// the first error after the pass completes.
    pub fn evaluate(&self, event: &Event) -> std::result::Result<TriggerOutcome, EvaluationError> {
        match self.mode {
            MatchMode::MatchAny => {
                let mut first_error = None;
                for (idx, pattern) in self.patterns.iter().enumerate() {
                    match matcher::evaluate(pattern, event) {
                        Ok(outcome) if outcome.matched => {
                            return Ok(TriggerOutcome {
                                matched: true,
                                score: outcome.score,
                                matched_patterns: vec![idx],
                            });
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(pattern = idx, error = %e, "pattern evaluation failed");
                            first_error.get_or_insert(e);
                        }
                    }
                }
                match first_error {
                    Some(err) => Err(err),
                    None => Ok(TriggerOutcome::no_match(Vec::new())),
                }
            }
            MatchMode::MatchAll => {
                let mut first_error = None;
                let mut matched_patterns = Vec::with_capacity(self.patterns.len());
                let mut score = 1.0_f64;

                for (idx, pattern) in self.patterns.iter().enumerate() {
                    match matcher::evaluate(pattern, event) {
                        Ok(MatchOutcome { matched: true, score: s }) => {
                            matched_patterns.push(idx);
                            score = score.min(s);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(pattern = idx, error = %e, "pattern evaluation failed");
                            first_error.get_or_insert(e);
                        }
                    }
                }

                if let Some(err) = first_error {
                    return Err(err);
                }
                if matched_patterns.len() == self.patterns.len() {
                    Ok(TriggerOutcome {
                        matched: true,
                        score,
                        matched_patterns,
                    })
                } else {
                    Ok(TriggerOutcome::no_match(matched_patterns))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
