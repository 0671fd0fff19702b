//! Per-kind match semantics.
//!
//! Every function here is pure: it reads a compiled [`Pattern`] and an
//! [`Event`] and returns a [`MatchOutcome`].  The only failure is an
//! [`EvaluationError`] for event data that violates its own contract (an
//! intent confidence outside `[0, 1]`), which callers treat as a non-match.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EvaluationError;
use crate::event::Event;
use crate::pattern::Pattern;

/// Result of evaluating one pattern or trigger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub matched: bool,
    /// In `[0, 1]`; always `0.0` when `matched` is false.
    pub score: f64,
}

impl MatchOutcome {
    pub const NO_MATCH: Self = Self {
        matched: false,
        score: 0.0,
    };

    pub const fn hit(score: f64) -> Self {
        Self {
            matched: true,
            score,
        }
    }

    const fn binary(matched: bool) -> Self {
        if matched { Self::hit(1.0) } else { Self::NO_MATCH }
    }
}

/// Evaluate a single pattern against an event.
pub fn evaluate(pattern: &Pattern, event: &Event) -> Result<MatchOutcome, EvaluationError> {
    let outcome = match pattern {
        Pattern::ExactText { literal } => MatchOutcome::binary(match_exact(literal, event)),
        Pattern::RegexText { regex, .. } => MatchOutcome::binary(match_regex(regex, event)),
        Pattern::Intent { name, threshold } => match_intent(name, *threshold, event)?,
        Pattern::Interaction { shape } => MatchOutcome::binary(
            event
                .interaction
                .as_ref()
                .is_some_and(|payload| subsumes(shape, payload)),
        ),
    };
    Ok(outcome)
}

fn match_exact(literal: &str, event: &Event) -> bool {
    event
        .normalized_text()
        .is_some_and(|text| text.to_lowercase() == literal)
}

/// Full-mode regexes carry their own `\A..\z` anchors, so both modes use
/// `is_match`.
fn match_regex(regex: &Regex, event: &Event) -> bool {
    event.normalized_text().is_some_and(|text| regex.is_match(text))
}

/// The highest confidence reported for `name` decides the outcome, so the
/// list's ordering is not relied on.
fn match_intent(name: &str, threshold: f64, event: &Event) -> Result<MatchOutcome, EvaluationError> {
    let mut best: Option<f64> = None;
    for entry in event.intents().iter().filter(|i| i.name == name) {
        let confidence = entry.confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EvaluationError::MalformedConfidence {
                intent: entry.name.clone(),
                confidence,
            });
        }
        best = Some(best.map_or(confidence, |b| b.max(confidence)));
    }

    let Some(confidence) = best else {
        return Ok(MatchOutcome::NO_MATCH);
    };
    if confidence >= threshold {
        Ok(MatchOutcome::hit(confidence))
    } else {
        Ok(MatchOutcome::NO_MATCH)
    }
}

/// Whether `payload` carries every key of `shape` with an equal value.
///
/// Keys missing from `shape` are wildcards.  Nested objects recurse with
/// the same rule; every other value (arrays included) must be equal, with
/// numbers compared by value so `1` and `1.0` agree.
pub fn subsumes(shape: &Map<String, Value>, payload: &Value) -> bool {
    let Value::Object(payload) = payload else {
        return false;
    };
    shape.iter().all(|(key, expected)| {
        payload
            .get(key)
            .is_some_and(|actual| value_matches(expected, actual))
    })
}

fn value_matches(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(shape), nested @ Value::Object(_)) => subsumes(shape, nested),
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| strict_equal(x, y))
        }
        _ => expected == actual,
    }
}

/// Array elements are compared exactly; objects inside arrays are not
/// treated as shapes.
fn strict_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::IntentScore;
    use crate::pattern::{CompileOptions, PatternDef, RegexMode};
    use serde_json::json;

    fn pattern(def: PatternDef) -> Pattern {
        Pattern::compile(&def, &CompileOptions::default()).expect("valid pattern")
    }

    fn eval(def: PatternDef, event: &Event) -> MatchOutcome {
        evaluate(&pattern(def), event).expect("evaluation should not fail")
    }

    #[test]
    fn exact_text_ignores_case_and_surrounding_whitespace() {
        let outcome = eval(PatternDef::exact("hello"), &Event::text("  Hello "));
        assert_eq!(outcome, MatchOutcome::hit(1.0));

        let outcome = eval(PatternDef::exact("hello"), &Event::text("hello there"));
        assert_eq!(outcome, MatchOutcome::NO_MATCH);
    }

    #[test]
    fn exact_text_without_text_does_not_match() {
        let event = Event::interaction(json!({"action": "hello"}));
        assert!(!eval(PatternDef::exact("hello"), &event).matched);
    }

    #[test]
    fn regex_search_mode_matches_anywhere() {
        let def = PatternDef::regex(r"order\s+\d+");
        assert!(eval(def.clone(), &Event::text("please order 42 now")).matched);
        assert!(!eval(def, &Event::text("please order")).matched);
    }

    #[test]
    fn regex_full_mode_requires_whole_text() {
        let def = PatternDef::regex_with_mode(r"^order\s+\d+", RegexMode::Full);
        assert_eq!(eval(def.clone(), &Event::text("order 42")), MatchOutcome::hit(1.0));
        assert!(!eval(def.clone(), &Event::text("please order")).matched);
        assert!(!eval(def, &Event::text("order 42 please")).matched);
    }

    #[test]
    fn regex_full_mode_respects_alternation() {
        let def = PatternDef::regex_with_mode("yes|yep", RegexMode::Full);
        assert!(eval(def.clone(), &Event::text("yep")).matched);
        assert!(!eval(def, &Event::text("yes sir")).matched);
    }

    #[test]
    fn regex_full_mode_accepts_trailing_verbose_comment() {
        let def = PatternDef::regex_with_mode(r"(?x) order \s+ \d+ # order number", RegexMode::Full);
        assert!(eval(def.clone(), &Event::text("order 42")).matched);
        assert!(!eval(def.clone(), &Event::text("order 42 please")).matched);
        assert!(!eval(def, &Event::text("please order 42")).matched);

        let plain = PatternDef::regex_with_mode(r"order \d+", RegexMode::Full);
        assert!(!eval(plain, &Event::text("order42")).matched);
    }

    #[test]
    fn regex_full_mode_still_rejects_invalid_source() {
        let def = PatternDef::regex_with_mode(r"a)|(b", RegexMode::Full);
        assert!(Pattern::compile(&def, &CompileOptions::default()).is_err());
    }

    #[test]
    fn regex_case_insensitive_flag() {
        let def = PatternDef::RegexText {
            source: "^hi".into(),
            mode: None,
            case_insensitive: true,
        };
        assert!(eval(def, &Event::text("HI there")).matched);
    }

    #[test]
    fn intent_threshold_boundaries() {
        let def = PatternDef::intent("book_flight", 0.8);

        let below = Event::text("fly").with_intents(vec![IntentScore::new("book_flight", 0.75)]);
        assert_eq!(eval(def.clone(), &below), MatchOutcome::NO_MATCH);

        let above = Event::text("fly").with_intents(vec![IntentScore::new("book_flight", 0.82)]);
        assert_eq!(eval(def.clone(), &above), MatchOutcome::hit(0.82));

        let exact = Event::text("fly").with_intents(vec![IntentScore::new("book_flight", 0.8)]);
        assert!(eval(def, &exact).matched);
    }

    #[test]
    fn intent_empty_or_missing_list_is_no_match() {
        let def = PatternDef::intent("greet", 0.1);
        assert!(!eval(def.clone(), &Event::text("hi").with_intents(vec![])).matched);
        assert!(!eval(def, &Event::text("hi")).matched);
    }

    #[test]
    fn intent_picks_named_entry_not_top_entry() {
        let event = Event::text("hi").with_intents(vec![
            IntentScore::new("greet", 0.9),
            IntentScore::new("book_flight", 0.6),
        ]);
        assert_eq!(
            eval(PatternDef::intent("book_flight", 0.5), &event),
            MatchOutcome::hit(0.6)
        );
    }

    #[test]
    fn intent_uses_highest_confidence_for_repeated_name() {
        let event = Event::text("fly").with_intents(vec![
            IntentScore::new("book_flight", 0.4),
            IntentScore::new("greet", 0.5),
            IntentScore::new("book_flight", 0.85),
        ]);
        assert_eq!(
            eval(PatternDef::intent("book_flight", 0.8), &event),
            MatchOutcome::hit(0.85)
        );
    }

    #[test]
    fn intent_out_of_range_confidence_is_an_evaluation_error() {
        let event = Event::text("hi").with_intents(vec![IntentScore::new("greet", 1.7)]);
        let result = evaluate(&pattern(PatternDef::intent("greet", 0.5)), &event);
        assert!(matches!(
            result,
            Err(EvaluationError::MalformedConfidence { .. })
        ));

        let event = Event::text("hi").with_intents(vec![IntentScore::new("greet", f64::NAN)]);
        assert!(evaluate(&pattern(PatternDef::intent("greet", 0.5)), &event).is_err());
    }

    #[test]
    fn interaction_ignores_extra_payload_keys() {
        let def = PatternDef::interaction(json!({"action": "confirm"}));
        let confirm = Event::interaction(json!({"action": "confirm", "ts": 123}));
        let cancel = Event::interaction(json!({"action": "cancel"}));

        assert_eq!(eval(def.clone(), &confirm), MatchOutcome::hit(1.0));
        assert!(!eval(def, &cancel).matched);
    }

    #[test]
    fn interaction_nested_shapes_and_numbers() {
        let def = PatternDef::interaction(json!({"button": {"id": 7}}));
        let event = Event::interaction(json!({"button": {"id": 7.0, "label": "Go"}}));
        assert!(eval(def.clone(), &event).matched);

        let missing = Event::interaction(json!({"button": {"label": "Go"}}));
        assert!(!eval(def, &missing).matched);
    }

    #[test]
    fn interaction_empty_shape_requires_some_payload() {
        let def = PatternDef::interaction(json!({}));
        assert!(eval(def.clone(), &Event::interaction(json!({"any": true}))).matched);
        assert!(!eval(def.clone(), &Event::interaction(json!("postback"))).matched);
        assert!(!eval(def, &Event::text("hi")).matched);
    }
}
