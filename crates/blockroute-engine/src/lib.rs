//! blockroute engine.
//!
//! Shared-state half of the trigger resolution engine:
//!
//! - **[`index`]** -- the candidate index, rebuilt off to the side and
//!   published with an atomic swap.
//! - **[`resolver`]** -- pure winner selection over one index snapshot.
//! - **[`coordinator`]** -- per-conversation FIFO dispatch, the entry point
//!   for live events.
//! - **[`context`]** -- what is remembered about a conversation.
//! - **[`store`]** / **[`classifier`]** -- collaborator traits and their
//!   shipped implementations.
//! - **[`bus`]** / **[`stats`]** -- observation of reindexes and resolutions.
//! - **[`config`]** -- [`EngineConfig`] loading.
//!
//! ```ignore
//! let coordinator = Coordinator::new(EngineConfig::load(path)?);
//! coordinator.reindex(&flow)?;
//! let outcome = coordinator.handle("conversation-1", Event::text("hi")).await;
//! ```

pub mod bus;
pub mod classifier;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod index;
pub mod resolver;
pub mod stats;
pub mod store;

pub use bus::{EngineEvent, EventBus};
pub use classifier::{CachedClassifier, IntentClassifier};
pub use config::EngineConfig;
pub use context::ConversationContext;
pub use coordinator::{ConversationState, Coordinator};
pub use error::{EngineError, Result};
pub use index::{CandidateIndex, IndexSnapshot, ReindexReport};
pub use resolver::{EvaluationSkipped, MatchResult, ResolvedOutcome, Resolver};
pub use stats::{EngineStats, StatsSnapshot};
pub use store::{FileFlowStore, FlowStore, MemoryFlowStore, load_flow_file};
