//! Pattern definitions and their compiled form.
//!
//! A pattern is one atomic match rule attached to a trigger.  Patterns come
//! in four kinds:
//!
//! | Kind | Payload | Score on match |
//! |------|---------|----------------|
//! | [`PatternKind::ExactText`] | literal text | 1.0 |
//! | [`PatternKind::RegexText`] | regex source + [`RegexMode`] | 1.0 |
//! | [`PatternKind::Intent`] | intent name + confidence threshold | classifier confidence |
//! | [`PatternKind::Interaction`] | JSON object shape | 1.0 |
//!
//! [`PatternDef`] is the persisted, uncompiled shape.  [`Pattern::compile`]
//! validates it exhaustively and produces an immutable [`Pattern`] with the
//! regex already built, so evaluation never has to parse anything.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The kind tag of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    ExactText,
    RegexText,
    Intent,
    Interaction,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactText => write!(f, "exact_text"),
            Self::RegexText => write!(f, "regex_text"),
            Self::Intent => write!(f, "intent"),
            Self::Interaction => write!(f, "interaction"),
        }
    }
}

/// Anchor semantics of a regex pattern.
///
/// `Search` succeeds when the regex matches anywhere in the text; `Full`
/// requires the regex to span the whole (trimmed) text.  Authors opt into
/// `Full` explicitly; `Search` is the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegexMode {
    #[default]
    Search,
    Full,
}

/// Persisted pattern definition, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternDef {
    ExactText {
        text: String,
    },
    RegexText {
        source: String,
        /// `None` defers to [`CompileOptions::default_regex_mode`].
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<RegexMode>,
        #[serde(default)]
        case_insensitive: bool,
    },
    Intent {
        name: String,
        #[serde(default)]
        threshold: f64,
    },
    Interaction {
        shape: Value,
    },
}

/// A pattern slot inside a persisted trigger.
///
/// Stored documents can be older or newer than this crate, so a slot that
/// does not decode as a [`PatternDef`] is kept verbatim and rejected when the
/// trigger is compiled.  This keeps one bad pattern from failing the decode
/// of the whole flow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternSource {
    Def(PatternDef),
    Unrecognized(Value),
}

impl From<PatternDef> for PatternSource {
    fn from(def: PatternDef) -> Self {
        Self::Def(def)
    }
}

/// Knobs applied while compiling patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Anchor semantics for regex patterns that do not declare one.
    pub default_regex_mode: RegexMode,
    /// Upper bound on the compiled size of a single regex, in bytes.
    pub regex_size_limit: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            default_regex_mode: RegexMode::Search,
            regex_size_limit: 1 << 20,
        }
    }
}

/// A compiled, immutable pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Lowercased, trimmed literal.
    ExactText { literal: String },
    RegexText {
        regex: Regex,
        mode: RegexMode,
        /// The author's source, kept for diagnostics.
        source: String,
    },
    Intent { name: String, threshold: f64 },
    Interaction { shape: Map<String, Value> },
}

// ---------------------------------------------------------------------------
// PatternDef helpers
// ---------------------------------------------------------------------------

impl PatternDef {
    pub fn exact(text: impl Into<String>) -> Self {
        Self::ExactText { text: text.into() }
    }

    /// A regex pattern using the configured default anchor mode.
    pub fn regex(source: impl Into<String>) -> Self {
        Self::RegexText {
            source: source.into(),
            mode: None,
            case_insensitive: false,
        }
    }

    pub fn regex_with_mode(source: impl Into<String>, mode: RegexMode) -> Self {
        Self::RegexText {
            source: source.into(),
            mode: Some(mode),
            case_insensitive: false,
        }
    }

    pub fn intent(name: impl Into<String>, threshold: f64) -> Self {
        Self::Intent {
            name: name.into(),
            threshold,
        }
    }

    pub fn interaction(shape: Value) -> Self {
        Self::Interaction { shape }
    }

    pub fn kind(&self) -> PatternKind {
        match self {
            Self::ExactText { .. } => PatternKind::ExactText,
            Self::RegexText { .. } => PatternKind::RegexText,
            Self::Intent { .. } => PatternKind::Intent,
            Self::Interaction { .. } => PatternKind::Interaction,
        }
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

impl Pattern {
    /// Validate a slot and compile it.
    pub fn compile_source(source: &PatternSource, options: &CompileOptions) -> Result<Self> {
        match source {
            PatternSource::Def(def) => Self::compile(def, options),
            PatternSource::Unrecognized(raw) => Err(CoreError::UnknownPattern {
                reason: describe_unrecognized(raw),
            }),
        }
    }

    /// Validate a definition and compile it.
    pub fn compile(def: &PatternDef, options: &CompileOptions) -> Result<Self> {
        let invalid = |reason: String| CoreError::InvalidPattern {
            kind: def.kind(),
            reason,
        };

        match def {
            PatternDef::ExactText { text } => {
                let literal = text.trim().to_lowercase();
                if literal.is_empty() {
                    return Err(invalid("literal is empty".into()));
                }
                Ok(Self::ExactText { literal })
            }
            PatternDef::RegexText {
                source,
                mode,
                case_insensitive,
            } => {
                if source.is_empty() {
                    return Err(invalid("regex source is empty".into()));
                }
                let mode = mode.unwrap_or(options.default_regex_mode);
                let build = |pattern: &str| {
                    RegexBuilder::new(pattern)
                        .case_insensitive(*case_insensitive)
                        .size_limit(options.regex_size_limit)
                        .build()
                        .map_err(|e| invalid(format!("`{source}`: {e}")))
                };
                // The source is validated on its own first, so the anchored
                // form can only fail when a trailing `(?x)` comment swallows
                // the closing group. A line break ends the comment and is
                // insignificant whitespace in verbose mode.
                let searching = build(source)?;
                let regex = match mode {
                    RegexMode::Search => searching,
                    RegexMode::Full => build(&format!(r"\A(?:{source})\z"))
                        .or_else(|_| build(&format!("\\A(?:{source}\n)\\z")))?,
                };
                tracing::trace!(source = %source, ?mode, "regex pattern compiled");
                Ok(Self::RegexText {
                    regex,
                    mode,
                    source: source.clone(),
                })
            }
            PatternDef::Intent { name, threshold } => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(invalid("intent name is empty".into()));
                }
                if !(0.0..=1.0).contains(threshold) {
                    return Err(invalid(format!(
                        "threshold {threshold} is outside [0, 1]"
                    )));
                }
                Ok(Self::Intent {
                    name: name.to_string(),
                    threshold: *threshold,
                })
            }
            PatternDef::Interaction { shape } => match shape {
                Value::Object(map) => Ok(Self::Interaction { shape: map.clone() }),
                other => Err(invalid(format!(
                    "shape must be a JSON object, got {}",
                    json_type_name(other)
                ))),
            },
        }
    }

    pub fn kind(&self) -> PatternKind {
        match self {
            Self::ExactText { .. } => PatternKind::ExactText,
            Self::RegexText { .. } => PatternKind::RegexText,
            Self::Intent { .. } => PatternKind::Intent,
            Self::Interaction { .. } => PatternKind::Interaction,
        }
    }
}

fn describe_unrecognized(raw: &Value) -> String {
    match raw.get("kind").and_then(Value::as_str) {
        Some(kind) => format!("unknown or malformed pattern of kind `{kind}`"),
        None => format!("expected a tagged pattern object, got {}", json_type_name(raw)),
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
