//! Core error types.
//!
//! Two families of failure exist in the core, and they never mix:
//!
//! - [`CoreError`] is raised while *building* patterns, triggers and flows.
//!   It is fatal to publishing the definition that caused it.
//! - [`EvaluationError`] is raised while *evaluating* a compiled trigger
//!   against an event.  Callers absorb it into a non-match for the affected
//!   candidate.

use crate::pattern::PatternKind;

/// Construction-time error for patterns, triggers, blocks and flows.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // -- Pattern / trigger errors -------------------------------------------
    /// A pattern payload is malformed for its kind (bad regex, threshold
    /// out of range, empty literal, non-object interaction shape).
    #[error("invalid {kind} pattern: {reason}")]
    InvalidPattern { kind: PatternKind, reason: String },

    /// A pattern definition could not be recognized as any known kind.
    #[error("unrecognized pattern definition: {reason}")]
    UnknownPattern { reason: String },

    /// A trigger was declared without any pattern.
    #[error("trigger has no patterns")]
    EmptyTrigger,

    // -- Block / flow errors ------------------------------------------------
    /// A trigger inside a block failed to compile.
    #[error("block `{block_id}` trigger #{trigger_index}: {source}")]
    InvalidTrigger {
        block_id: String,
        trigger_index: usize,
        #[source]
        source: Box<CoreError>,
    },

    /// A block definition is structurally invalid.
    #[error("invalid block `{block_id}`: {reason}")]
    InvalidBlock { block_id: String, reason: String },

    /// Two blocks in the same flow share an identifier.
    #[error("duplicate block id `{block_id}` in flow `{flow_id}`")]
    DuplicateBlock { flow_id: String, block_id: String },

    // -- Serialization ------------------------------------------------------
    /// JSON flow or pattern document could not be decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML flow document could not be decoded.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Recoverable per-candidate failure found while evaluating an event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    /// The event carried an intent whose confidence is NaN or outside
    /// `[0, 1]`.
    #[error("intent `{intent}` carries out-of-range confidence {confidence}")]
    MalformedConfidence { intent: String, confidence: f64 },
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;
