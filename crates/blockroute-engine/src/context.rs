//! Per-conversation state.

use blockroute_core::{Event, ScopeDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resolver::ResolvedOutcome;

/// What the engine remembers about one conversation between events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub current_scope: ScopeDescriptor,
    pub last_resolved_block_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_resolved_at: Option<DateTime<Utc>>,
    /// Number of events resolved so far, matched or not.
    pub resolutions: u64,
}

impl ConversationContext {
    /// A fresh conversation in the initial state.
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            current_scope: ScopeDescriptor::default(),
            last_resolved_block_id: None,
            created_at: Utc::now(),
            last_resolved_at: None,
            resolutions: 0,
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: ScopeDescriptor) -> Self {
        self.current_scope = scope;
        self
    }

    /// Scope to resolve `event` in.  Channel and locale carried by the
    /// event take precedence over the ones remembered for the conversation.
    pub fn scope_for(&self, event: &Event) -> ScopeDescriptor {
        ScopeDescriptor {
            state: self.current_scope.state.clone(),
            channel: event
                .channel
                .clone()
                .or_else(|| self.current_scope.channel.clone()),
            locale: event
                .locale
                .clone()
                .or_else(|| self.current_scope.locale.clone()),
        }
    }

    /// Fold a resolution into the context.
    ///
    /// The event's channel and locale are remembered.  A winner updates the
    /// last resolved block and, when it declares one, moves the
    /// conversation to its next state.  A no-match leaves state untouched.
    pub fn apply(&mut self, event: &Event, outcome: &ResolvedOutcome) {
        if let Some(channel) = &event.channel {
            self.current_scope.channel = Some(channel.clone());
        }
        if let Some(locale) = &event.locale {
            self.current_scope.locale = Some(locale.clone());
        }
        self.resolutions += 1;

        let Some(winner) = &outcome.winner else {
            return;
        };
        self.last_resolved_block_id = Some(winner.block_id.clone());
        self.last_resolved_at = Some(Utc::now());
        if let Some(next) = &winner.next_state {
            tracing::debug!(
                conversation_id = %self.conversation_id,
                from = %self.current_scope.state,
                to = %next,
                "conversation state transition"
            );
            self.current_scope.state = next.clone();
        }
    }
}
