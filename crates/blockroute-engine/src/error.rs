//! Engine error types.
//!
//! Only control-plane operations (reindexing, loading flows, reading
//! configuration, classifier calls) return [`EngineError`].  Live
//! resolution never does: per-event failures are folded into the
//! [`ResolvedOutcome`](crate::resolver::ResolvedOutcome).

use blockroute_core::CoreError;

/// Unified error type for the engine crate.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // -- Index errors -------------------------------------------------------
    /// A new candidate index could not be built.  The previous index is
    /// still installed and serving.
    #[error("reindex of flow `{flow_id}` failed: {reason}")]
    ReindexFailure { flow_id: String, reason: String },

    // -- Store errors -------------------------------------------------------
    /// The flow store has no flow with this id.
    #[error("flow not found: {flow_id}")]
    FlowNotFound { flow_id: String },

    // -- Collaborator errors ------------------------------------------------
    /// The intent classifier failed for a piece of text.
    #[error("intent classifier failed: {reason}")]
    Classifier { reason: String },

    // -- Configuration ------------------------------------------------------
    #[error("configuration error: {reason}")]
    Config { reason: String },

    // -- Upstream -----------------------------------------------------------
    /// An error propagated from the core crate.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;
