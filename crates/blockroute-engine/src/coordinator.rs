//! Dispatch coordinator.
//!
//! [`Coordinator::handle`] is the engine's entry point for live events.  Each
//! conversation owns a slot holding its [`ConversationContext`] behind a
//! `tokio::sync::Mutex`.  The mutex is fair, so events for one conversation
//! are resolved one at a time in the order they reached the lock, while
//! events for different conversations never contend.
//!
//! ```text
//!            handle(c1, e2) ──┐ queued
//! handle(c1, e1) ── lock ── Resolving ── classify? ── resolve ── apply ── Idle
//! handle(c2, e3) ── lock ── Resolving ── ...                     (parallel)
//! ```
//!
//! The `Resolving` flag and queue counter are scoped guards, so they are
//! reset on every exit path, including a panicking classifier or a dropped
//! future.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use blockroute_core::{Event, FlowDef};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::bus::{EngineEvent, EventBus};
use crate::classifier::{CachedClassifier, IntentClassifier};
use crate::config::EngineConfig;
use crate::context::ConversationContext;
use crate::error::{EngineError, Result};
use crate::index::{CandidateIndex, ReindexReport};
use crate::resolver::{ResolvedOutcome, Resolver};
use crate::stats::EngineStats;
use crate::store::FlowStore;

// ---------------------------------------------------------------------------
// Conversation state
// ---------------------------------------------------------------------------

/// Per-conversation lifecycle: `Idle -> Resolving -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    Resolving,
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Resolving => write!(f, "resolving"),
        }
    }
}

struct ConversationSlot {
    context: Mutex<ConversationContext>,
    resolving: AtomicBool,
    queued: AtomicUsize,
}

impl ConversationSlot {
    fn new(conversation_id: &str) -> Self {
        Self {
            context: Mutex::new(ConversationContext::new(conversation_id)),
            resolving: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
        }
    }
}

/// Marks a slot `Resolving` until dropped.
struct ResolvingGuard<'a>(&'a AtomicBool);

impl<'a> ResolvingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for ResolvingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Counts a waiter until dropped.
struct QueuedGuard<'a>(&'a AtomicUsize);

impl<'a> QueuedGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Concurrency-safe front of the engine.  Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: EngineConfig,
    resolver: Resolver,
    conversations: DashMap<String, Arc<ConversationSlot>>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    bus: EventBus,
    stats: EngineStats,
}

impl Coordinator {
    /// A coordinator with an empty index and no classifier.
    pub fn new(config: EngineConfig) -> Self {
        Self::build(config, None)
    }

    /// A coordinator that classifies unclassified text events.
    ///
    /// The classifier is wrapped in a [`CachedClassifier`] unless
    /// `classifier_cache_capacity` is zero.
    pub fn with_classifier<C>(config: EngineConfig, classifier: C) -> Self
    where
        C: IntentClassifier + 'static,
    {
        let classifier: Arc<dyn IntentClassifier> = if config.classifier_cache_capacity == 0 {
            Arc::new(classifier)
        } else {
            Arc::new(CachedClassifier::new(
                classifier,
                config.classifier_cache_capacity,
                Duration::from_secs(config.classifier_cache_ttl_secs),
            ))
        };
        Self::build(config, Some(classifier))
    }

    fn build(config: EngineConfig, classifier: Option<Arc<dyn IntentClassifier>>) -> Self {
        let bus = EventBus::new(config.event_bus_capacity.max(1));
        Self {
            inner: Arc::new(CoordinatorInner {
                resolver: Resolver::new(Arc::new(CandidateIndex::new())),
                conversations: DashMap::new(),
                classifier,
                bus,
                stats: EngineStats::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn index(&self) -> &Arc<CandidateIndex> {
        self.inner.resolver.index()
    }

    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    pub fn stats(&self) -> &EngineStats {
        &self.inner.stats
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EngineEvent>> {
        self.inner.bus.subscribe()
    }

    // -- Index maintenance --------------------------------------------------

    /// Compile `def` and install it as the active index.
    ///
    /// Failures leave the previous index serving; they are returned, logged
    /// and published as [`EngineEvent::ReindexFailed`].
    pub fn reindex(&self, def: &FlowDef) -> Result<ReindexReport> {
        let config = &self.inner.config;
        match self.index().reindex(
            def,
            &config.compile_options(),
            config.invalid_trigger_policy,
        ) {
            Ok(report) => {
                self.inner.stats.record_reindex(true);
                self.inner.bus.publish(EngineEvent::Reindexed {
                    flow_id: report.flow_id.clone(),
                    version: report.version,
                    indexed_blocks: report.indexed_blocks,
                    dropped_triggers: report.compile.dropped_triggers.len(),
                    timestamp: Utc::now(),
                });
                Ok(report)
            }
            Err(e) => Err(self.reindex_failed(&def.id, e)),
        }
    }

    /// Load `flow_id` from `store` and reindex it.  A store error is reported
    /// as [`EngineError::ReindexFailure`] and keeps the old index.
    pub async fn reload(&self, store: &dyn FlowStore, flow_id: &str) -> Result<ReindexReport> {
        let def = match store.load_flow(flow_id).await {
            Ok(def) => def,
            Err(e) => {
                let failure = EngineError::ReindexFailure {
                    flow_id: flow_id.to_string(),
                    reason: e.to_string(),
                };
                return Err(self.reindex_failed(flow_id, failure));
            }
        };
        self.reindex(&def)
    }

    fn reindex_failed(&self, flow_id: &str, error: EngineError) -> EngineError {
        tracing::error!(flow_id, error = %error, "reindex failed, previous index kept");
        self.inner.stats.record_reindex(false);
        let reason = match &error {
            EngineError::ReindexFailure { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        self.inner.bus.publish(EngineEvent::ReindexFailed {
            flow_id: flow_id.to_string(),
            reason,
            timestamp: Utc::now(),
        });
        error
    }

    // -- Live resolution ----------------------------------------------------

    /// Resolve one event for a conversation.
    ///
    /// Waits behind earlier events of the same conversation.  Never fails:
    /// evaluation problems are reported inside the outcome.
    pub async fn handle(&self, conversation_id: &str, mut event: Event) -> ResolvedOutcome {
        let slot = self.slot(conversation_id);

        let mut context = {
            let _queued = QueuedGuard::enter(&slot.queued);
            slot.context.lock().await
        };
        let _resolving = ResolvingGuard::enter(&slot.resolving);

        self.classify_if_needed(conversation_id, &mut event).await;

        let outcome = self.inner.resolver.resolve(&context, &event);
        context.apply(&event, &outcome);
        self.record(conversation_id, &outcome);
        outcome
    }

    async fn classify_if_needed(&self, conversation_id: &str, event: &mut Event) {
        if !self.inner.config.classify_missing_intents || !event.needs_classification() {
            return;
        }
        let (Some(classifier), Some(text)) = (&self.inner.classifier, event.normalized_text())
        else {
            return;
        };
        match classifier.classify(text).await {
            Ok(intents) => {
                tracing::debug!(
                    conversation_id,
                    classifier = classifier.name(),
                    intents = intents.len(),
                    "event classified"
                );
                event.intents = Some(intents);
            }
            Err(e) => {
                self.inner.stats.record_classifier_failure();
                tracing::warn!(
                    conversation_id,
                    classifier = classifier.name(),
                    error = %e,
                    "classification failed, resolving without intents"
                );
            }
        }
    }

    fn record(&self, conversation_id: &str, outcome: &ResolvedOutcome) {
        let inner = &self.inner;
        inner
            .stats
            .record_resolution(outcome.is_match(), outcome.skipped.len());

        let resolution_id = Uuid::now_v7();
        let timestamp = Utc::now();
        for skipped in &outcome.skipped {
            inner.bus.publish(EngineEvent::EvaluationSkipped {
                resolution_id,
                conversation_id: conversation_id.to_string(),
                block_id: skipped.block_id.clone(),
                trigger_index: skipped.trigger_index,
                reason: skipped.reason.clone(),
                timestamp,
            });
        }
        let event = match &outcome.winner {
            Some(winner) => EngineEvent::Resolved {
                resolution_id,
                conversation_id: conversation_id.to_string(),
                block_id: winner.block_id.clone(),
                score: winner.score,
                timestamp,
            },
            None => EngineEvent::NoMatch {
                resolution_id,
                conversation_id: conversation_id.to_string(),
                evaluated: outcome.evaluated_count,
                timestamp,
            },
        };
        inner.bus.publish(event);
    }

    fn slot(&self, conversation_id: &str) -> Arc<ConversationSlot> {
        if let Some(slot) = self.inner.conversations.get(conversation_id) {
            return Arc::clone(slot.value());
        }
        let slot = self
            .inner
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(conversation_id, "conversation created");
                Arc::new(ConversationSlot::new(conversation_id))
            });
        Arc::clone(slot.value())
    }

    // -- Introspection ------------------------------------------------------

    /// `None` for a conversation that never sent an event.
    pub fn state(&self, conversation_id: &str) -> Option<ConversationState> {
        self.inner.conversations.get(conversation_id).map(|slot| {
            if slot.resolving.load(Ordering::Acquire) {
                ConversationState::Resolving
            } else {
                ConversationState::Idle
            }
        })
    }

    /// Events waiting behind the one currently resolving.
    pub fn queued(&self, conversation_id: &str) -> usize {
        self.inner
            .conversations
            .get(conversation_id)
            .map_or(0, |slot| slot.queued.load(Ordering::Acquire))
    }

    /// A copy of the conversation's context.  Waits for queued events of
    /// that conversation to finish first.
    pub async fn context(&self, conversation_id: &str) -> Option<ConversationContext> {
        let slot = self
            .inner
            .conversations
            .get(conversation_id)
            .map(|s| Arc::clone(s.value()))?;
        let context = slot.context.lock().await;
        Some(context.clone())
    }

    pub fn conversation_count(&self) -> usize {
        self.inner.conversations.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blockroute_core::{BlockDef, IntentScore, PatternDef, TriggerDef};

    fn support_flow() -> FlowDef {
        FlowDef::new(
            "support",
            vec![
                BlockDef::new("greet")
                    .trigger(TriggerDef::any(vec![PatternDef::intent("greet", 0.5)]))
                    .next_state("menu"),
                BlockDef::new("menu-help")
                    .scope(blockroute_core::Scope::in_states(["menu"]))
                    .trigger(TriggerDef::any(vec![PatternDef::exact("help")])),
            ],
        )
    }

    struct Keyword;

    #[async_trait]
    impl IntentClassifier for Keyword {
        fn name(&self) -> &str {
            "keyword"
        }

        async fn classify(&self, text: &str) -> Result<Vec<IntentScore>> {
            if text.to_lowercase().contains("hello") {
                Ok(vec![IntentScore::new("greet", 0.9)])
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[tokio::test]
    async fn handle_classifies_resolves_and_moves_state() {
        let coordinator = Coordinator::with_classifier(EngineConfig::default(), Keyword);
        coordinator.reindex(&support_flow()).unwrap();

        let outcome = coordinator.handle("c1", Event::text("hello there")).await;
        assert_eq!(outcome.winner_block_id(), Some("greet"));
        assert_eq!(coordinator.state("c1"), Some(ConversationState::Idle));

        let context = coordinator.context("c1").await.unwrap();
        assert_eq!(context.current_scope.state, "menu");

        let outcome = coordinator.handle("c1", Event::text("HELP")).await;
        assert_eq!(outcome.winner_block_id(), Some("menu-help"));
    }

    #[tokio::test]
    async fn classification_can_be_disabled() {
        let config = EngineConfig {
            classify_missing_intents: false,
            ..EngineConfig::default()
        };
        let coordinator = Coordinator::with_classifier(config, Keyword);
        coordinator.reindex(&support_flow()).unwrap();

        let outcome = coordinator.handle("c1", Event::text("hello")).await;
        assert!(!outcome.is_match());
    }

    #[tokio::test]
    async fn unknown_conversation_has_no_state() {
        let coordinator = Coordinator::new(EngineConfig::default());
        assert_eq!(coordinator.state("nobody"), None);
        assert!(coordinator.context("nobody").await.is_none());
        assert_eq!(coordinator.queued("nobody"), 0);
    }

    #[tokio::test]
    async fn reindex_and_resolution_events_are_published() {
        let coordinator = Coordinator::new(EngineConfig::default());
        let mut rx = coordinator.subscribe();

        coordinator.reindex(&support_flow()).unwrap();
        coordinator.handle("c1", Event::text("nothing")).await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.as_ref(), EngineEvent::Reindexed { indexed_blocks: 2, .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.as_ref(), EngineEvent::NoMatch { .. }));

        let stats = coordinator.stats().snapshot();
        assert_eq!(stats.reindexes, 1);
        assert_eq!(stats.no_match, 1);
    }

    #[tokio::test]
    async fn failed_reindex_is_published_and_counted() {
        let coordinator = Coordinator::new(EngineConfig::default());
        let mut rx = coordinator.subscribe();

        let bad = FlowDef::new(
            "support",
            vec![BlockDef::new("x").trigger(TriggerDef::any(vec![PatternDef::exact("  ")]))],
        );
        assert!(matches!(
            coordinator.reindex(&bad),
            Err(EngineError::ReindexFailure { .. })
        ));

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.as_ref(), EngineEvent::ReindexFailed { .. }));
        assert_eq!(coordinator.stats().snapshot().reindex_failures, 1);
    }
}
