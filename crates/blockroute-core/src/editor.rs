//! Visual editor shorthand.
//!
//! The block editor stores each pattern as a bare JSON value whose *shape*
//! says what it is.  Its "add pattern" menu starts every kind from a fixed
//! default:
//!
//! | Editor action | Default | Decoded as |
//! |---------------|---------|------------|
//! | Exact Match | `""` | [`PatternDef::ExactText`] |
//! | Pattern Match | `"//"` | [`PatternDef::RegexText`] |
//! | Intent Match | `[]` | one [`PatternDef::Intent`] per entity |
//! | Interaction | `{}` | [`PatternDef::Interaction`] |
//!
//! Regex strings are written `/source/flags`.  Recognized flags are `i`
//! (case-insensitive), `f` (full-match mode) and `s` (search mode).  A regex
//! that declares neither `f` nor `s` defers to the engine default.
//!
//! The editor's pattern list is a disjunction: any entry firing selects the
//! block.  An intent entry made of several entities requires all of them.

use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::pattern::{PatternDef, PatternKind, RegexMode, json_type_name};
use crate::trigger::{MatchMode, TriggerDef};

/// Decode one editor value into one or more pattern definitions.
///
/// Only intent arrays produce more than one definition.
pub fn patterns_from_editor(value: &Value) -> Result<Vec<PatternDef>> {
    match value {
        Value::String(text) => Ok(vec![pattern_from_string(text)?]),
        Value::Array(entities) => intents_from_entities(entities),
        Value::Object(_) => Ok(vec![PatternDef::interaction(value.clone())]),
        other => Err(CoreError::UnknownPattern {
            reason: format!("editor pattern cannot be a {}", json_type_name(other)),
        }),
    }
}

/// Map a block's editor pattern list onto triggers, one per entry, in order.
pub fn block_triggers_from_editor(values: &[Value]) -> Result<Vec<TriggerDef>> {
    values
        .iter()
        .map(|value| {
            let patterns = patterns_from_editor(value)?;
            let mode = if value.is_array() {
                MatchMode::MatchAll
            } else {
                MatchMode::MatchAny
            };
            Ok(TriggerDef::new(mode, patterns))
        })
        .collect()
}

fn pattern_from_string(text: &str) -> Result<PatternDef> {
    match split_regex_literal(text) {
        Some((source, flags)) => regex_from_parts(source, flags),
        None => Ok(PatternDef::exact(text)),
    }
}

/// `/source/flags` → `(source, flags)`; `None` when `text` is not a regex
/// literal.  Slashes inside the source need no escaping because the last
/// slash closes the literal.
fn split_regex_literal(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('/')?;
    let close = rest.rfind('/')?;
    let (source, flags) = (&rest[..close], &rest[close + 1..]);
    flags
        .chars()
        .all(|c| c.is_ascii_alphabetic())
        .then_some((source, flags))
}

fn regex_from_parts(source: &str, flags: &str) -> Result<PatternDef> {
    let invalid = |reason: String| CoreError::InvalidPattern {
        kind: PatternKind::RegexText,
        reason,
    };

    if source.is_empty() {
        return Err(invalid("regex literal has an empty body".into()));
    }

    let mut mode = None;
    let mut case_insensitive = false;
    for flag in flags.chars() {
        match flag {
            'i' => case_insensitive = true,
            'f' => mode = Some(RegexMode::Full),
            's' => mode = Some(RegexMode::Search),
            other => return Err(invalid(format!("unknown regex flag `{other}`"))),
        }
    }

    Ok(PatternDef::RegexText {
        source: source.to_string(),
        mode,
        case_insensitive,
    })
}

fn intents_from_entities(entities: &[Value]) -> Result<Vec<PatternDef>> {
    let invalid = |reason: String| CoreError::InvalidPattern {
        kind: PatternKind::Intent,
        reason,
    };

    if entities.is_empty() {
        return Err(invalid("intent match lists no entity".into()));
    }

    entities
        .iter()
        .map(|entity| {
            let kind = entity.get("entity").and_then(Value::as_str);
            if kind != Some("intent") {
                return Err(invalid(format!(
                    "only `intent` entities are supported, got {}",
                    kind.map_or_else(|| "none".to_string(), |k| format!("`{k}`"))
                )));
            }
            let name = entity
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("intent entity has no string `value`".into()))?;
            let threshold = match entity.get("confidence") {
                None | Some(Value::Null) => 0.0,
                Some(v) => v
                    .as_f64()
                    .ok_or_else(|| invalid("intent `confidence` must be a number".into()))?,
            };
            Ok(PatternDef::intent(name, threshold))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{CompileOptions, Pattern};
    use serde_json::json;

    #[test]
    fn plain_string_is_exact_text() {
        assert_eq!(
            patterns_from_editor(&json!("Hello")).unwrap(),
            vec![PatternDef::exact("Hello")]
        );
    }

    #[test]
    fn slash_string_is_regex_with_flags() {
        let defs = patterns_from_editor(&json!(r"/^order\s+\d+/fi")).unwrap();
        assert_eq!(
            defs,
            vec![PatternDef::RegexText {
                source: r"^order\s+\d+".into(),
                mode: Some(RegexMode::Full),
                case_insensitive: true,
            }]
        );
    }

    #[test]
    fn regex_body_may_contain_slashes() {
        let defs = patterns_from_editor(&json!("/a/b/")).unwrap();
        assert_eq!(defs, vec![PatternDef::regex("a/b")]);
    }

    #[test]
    fn editor_defaults_for_text_kinds_do_not_compile() {
        // The editor seeds new exact and regex patterns with "" and "//".
        let exact = &patterns_from_editor(&json!("")).unwrap()[0];
        assert!(Pattern::compile(exact, &CompileOptions::default()).is_err());
        assert!(patterns_from_editor(&json!("//")).is_err());
        assert!(patterns_from_editor(&json!([])).is_err());
    }

    #[test]
    fn unknown_regex_flag_is_rejected() {
        assert!(patterns_from_editor(&json!("/abc/x")).is_err());
    }

    #[test]
    fn slash_without_closing_slash_is_exact_text() {
        assert_eq!(
            patterns_from_editor(&json!("/start")).unwrap(),
            vec![PatternDef::exact("/start")]
        );
    }

    #[test]
    fn entity_array_becomes_intents() {
        let defs = patterns_from_editor(&json!([
            {"entity": "intent", "match": "value", "value": "book_flight", "confidence": 0.8},
            {"entity": "intent", "value": "urgent"}
        ]))
        .unwrap();
        assert_eq!(
            defs,
            vec![
                PatternDef::intent("book_flight", 0.8),
                PatternDef::intent("urgent", 0.0)
            ]
        );
    }

    #[test]
    fn non_intent_entity_is_rejected() {
        assert!(patterns_from_editor(&json!([{"entity": "city", "value": "Paris"}])).is_err());
    }

    #[test]
    fn object_is_interaction_shape() {
        let shape = json!({"label": "Yes", "value": "confirm"});
        assert_eq!(
            patterns_from_editor(&shape).unwrap(),
            vec![PatternDef::interaction(shape)]
        );
    }

    #[test]
    fn scalars_other_than_strings_are_rejected() {
        assert!(matches!(
            patterns_from_editor(&json!(42)),
            Err(CoreError::UnknownPattern { .. })
        ));
    }

    #[test]
    fn block_pattern_list_maps_to_ordered_triggers() {
        let triggers = block_triggers_from_editor(&[
            json!("hi"),
            json!([
                {"entity": "intent", "value": "greet"},
                {"entity": "intent", "value": "polite"}
            ]),
            json!({"value": "menu"}),
        ])
        .unwrap();

        assert_eq!(triggers.len(), 3);
        assert_eq!(triggers[0].mode, MatchMode::MatchAny);
        assert_eq!(triggers[1].mode, MatchMode::MatchAll);
        assert_eq!(triggers[1].patterns.len(), 2);
        assert_eq!(triggers[2].mode, MatchMode::MatchAny);
    }
}
