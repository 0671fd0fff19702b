//! Normalized inbound event.
//!
//! Channel adapters turn raw payloads (a typed message, a button click, a
//! quick reply) into an [`Event`] before it reaches the engine.  The engine
//! never sees channel-specific shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of an intent classifier's ranked output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentScore {
    /// Intent name as known to the classifier (e.g. `book_flight`).
    pub name: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl IntentScore {
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }
}

/// A normalized user event.
///
/// Every field is optional: a button click usually carries only an
/// interaction payload, a typed message only text.  `intents` is `None` when
/// the event has not been classified yet and `Some(vec![])` when the
/// classifier recognized nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    pub text: Option<String>,
    pub interaction: Option<Value>,
    pub intents: Option<Vec<IntentScore>>,
    /// Channel the event arrived on, when the adapter knows it.
    pub channel: Option<String>,
    /// Locale of the sender, when the adapter knows it.
    pub locale: Option<String>,
}

impl Event {
    /// A plain text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// A structured interaction (button, quick reply, postback).
    pub fn interaction(payload: Value) -> Self {
        Self {
            interaction: Some(payload),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_intents(mut self, intents: Vec<IntentScore>) -> Self {
        self.intents = Some(intents);
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Trimmed text, or `None` when the event has no non-blank text.
    pub fn normalized_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Ranked intents; empty when the event was never classified.
    pub fn intents(&self) -> &[IntentScore] {
        self.intents.as_deref().unwrap_or(&[])
    }

    /// Whether the event still needs a classifier pass.
    pub fn needs_classification(&self) -> bool {
        self.intents.is_none() && self.normalized_text().is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_text_normalizes_to_none() {
        assert_eq!(Event::text("   ").normalized_text(), None);
        assert_eq!(Event::text("  hi ").normalized_text(), Some("hi"));
        assert_eq!(Event::default().normalized_text(), None);
    }

    #[test]
    fn classification_needed_only_for_unclassified_text() {
        assert!(Event::text("hello").needs_classification());
        assert!(!Event::text("hello").with_intents(vec![]).needs_classification());
        assert!(!Event::interaction(json!({"action": "ok"})).needs_classification());
    }

    #[test]
    fn deserializes_partial_events() {
        let event: Event = serde_json::from_value(json!({
            "text": "book a flight",
            "intents": [{"name": "book_flight", "confidence": 0.9}]
        }))
        .unwrap();
        assert_eq!(event.intents().len(), 1);
        assert!(event.interaction.is_none());
    }
}
