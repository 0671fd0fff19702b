//! blockroute core model.
//!
//! This crate holds everything about a chatbot flow that can be decided
//! without shared state:
//!
//! - **[`pattern`]** -- the four pattern kinds, their persisted definitions
//!   and compile-time validation.
//! - **[`matcher`]** -- pure per-kind match semantics and scoring.
//! - **[`trigger`]** -- ordered patterns combined with `MatchAny`/`MatchAll`.
//! - **[`flow`]** -- blocks, flows, conversation scopes, and the invalid
//!   trigger policy applied while compiling a flow.
//! - **[`editor`]** -- decoding of the visual editor's pattern shorthand.
//! - **[`event`]** -- the normalized inbound event.
//! - **[`error`]** -- construction errors ([`CoreError`]) and recoverable
//!   evaluation errors ([`EvaluationError`]).
//!
//! Compiled types are immutable and `Send + Sync`; the engine crate shares
//! them across resolutions behind `Arc`.

pub mod editor;
pub mod error;
pub mod event;
pub mod flow;
pub mod matcher;
pub mod pattern;
pub mod trigger;

pub use error::{CoreError, EvaluationError, Result};
pub use event::{Event, IntentScore};
pub use flow::{
    Block, BlockDef, BlockId, CompileReport, DroppedTrigger, Flow, FlowDef, InvalidTriggerPolicy,
    Scope, ScopeDescriptor,
};
pub use matcher::MatchOutcome;
pub use pattern::{CompileOptions, Pattern, PatternDef, PatternKind, PatternSource, RegexMode};
pub use trigger::{MatchMode, Trigger, TriggerDef, TriggerOutcome};
