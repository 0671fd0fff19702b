//! Blocks, flows and conversation scopes.
//!
//! A [`FlowDef`] is what the authoring side persists: an ordered list of
//! [`BlockDef`]s.  [`Flow::compile`] turns it into a [`Flow`] whose blocks
//! carry compiled triggers and their authoring position, ready to be
//! indexed.  Compilation is all-or-nothing under
//! [`InvalidTriggerPolicy::RejectFlow`]; under
//! [`InvalidTriggerPolicy::DropTrigger`] malformed triggers are removed and
//! listed in the returned [`CompileReport`].

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::pattern::CompileOptions;
use crate::trigger::{Trigger, TriggerDef};

/// Block identifier, unique within a flow.
pub type BlockId = String;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Where a conversation currently is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeDescriptor {
    /// Conversation state; new conversations start in [`Self::INITIAL_STATE`].
    pub state: String,
    pub channel: Option<String>,
    pub locale: Option<String>,
}

impl ScopeDescriptor {
    pub const INITIAL_STATE: &'static str = "start";

    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            channel: None,
            locale: None,
        }
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
}

impl Default for ScopeDescriptor {
    fn default() -> Self {
        Self::new(Self::INITIAL_STATE)
    }
}

/// Eligibility predicate of a block.  An empty list accepts anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scope {
    pub states: Vec<String>,
    pub channels: Vec<String>,
    pub locales: Vec<String>,
}

impl Scope {
    /// Eligible everywhere.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn in_states<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            states: states.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn accepts(&self, scope: &ScopeDescriptor) -> bool {
        self.accepts_state(&scope.state)
            && list_accepts(&self.channels, scope.channel.as_deref())
            && list_accepts(&self.locales, scope.locale.as_deref())
    }

    pub fn accepts_state(&self, state: &str) -> bool {
        self.states.is_empty() || self.states.iter().any(|s| s == state)
    }

    /// Whether the block is eligible regardless of conversation state.
    pub fn is_state_wildcard(&self) -> bool {
        self.states.is_empty()
    }

    /// Channel/locale part of the predicate only.
    pub fn accepts_audience(&self, scope: &ScopeDescriptor) -> bool {
        list_accepts(&self.channels, scope.channel.as_deref())
            && list_accepts(&self.locales, scope.locale.as_deref())
    }
}

/// An unknown value only passes an unrestricted list.
fn list_accepts(allowed: &[String], value: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    value.is_some_and(|v| allowed.iter().any(|a| a.eq_ignore_ascii_case(v)))
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// Persisted block definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDef {
    pub id: BlockId,
    #[serde(default)]
    pub triggers: Vec<TriggerDef>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub scope: Scope,
    /// State the conversation moves to once this block wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_state: Option<String>,
}

impl BlockDef {
    pub fn new(id: impl Into<BlockId>) -> Self {
        Self {
            id: id.into(),
            triggers: Vec::new(),
            priority: 0,
            scope: Scope::any(),
            next_state: None,
        }
    }

    #[must_use]
    pub fn trigger(mut self, trigger: TriggerDef) -> Self {
        self.triggers.push(trigger);
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn next_state(mut self, state: impl Into<String>) -> Self {
        self.next_state = Some(state.into());
        self
    }
}

/// A compiled block.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub triggers: Vec<Trigger>,
    pub priority: i32,
    pub scope: Scope,
    pub next_state: Option<String>,
    /// Position in the authoring order of the flow.
    pub order: usize,
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

/// What to do with a trigger that fails to compile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidTriggerPolicy {
    /// The whole flow is rejected.
    #[default]
    RejectFlow,
    /// Only the offending trigger is removed.
    DropTrigger,
}

/// Persisted flow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDef {
    pub id: String,
    #[serde(default)]
    pub blocks: Vec<BlockDef>,
}

impl FlowDef {
    pub fn new(id: impl Into<String>, blocks: Vec<BlockDef>) -> Self {
        Self {
            id: id.into(),
            blocks,
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Decode by file extension: `.toml` is TOML, anything else JSON.
    pub fn from_document(path: &Path, text: &str) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(text),
            _ => Self::from_json(text),
        }
    }
}

/// A trigger removed under [`InvalidTriggerPolicy::DropTrigger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedTrigger {
    pub block_id: BlockId,
    pub trigger_index: usize,
    pub reason: String,
}

/// Side information produced while compiling a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileReport {
    pub dropped_triggers: Vec<DroppedTrigger>,
    /// Blocks that ended up with no trigger and can never match.
    pub untriggered_blocks: Vec<BlockId>,
}

/// A compiled flow.
#[derive(Debug, Clone)]
pub struct Flow {
    pub id: String,
    pub blocks: Vec<Block>,
}

impl Flow {
    /// Validate and compile a flow definition.
    pub fn compile(
        def: &FlowDef,
        options: &CompileOptions,
        policy: InvalidTriggerPolicy,
    ) -> Result<(Self, CompileReport)> {
        let mut seen = HashSet::with_capacity(def.blocks.len());
        let mut report = CompileReport::default();
        let mut blocks = Vec::with_capacity(def.blocks.len());

        for (order, block) in def.blocks.iter().enumerate() {
            if block.id.trim().is_empty() {
                return Err(CoreError::InvalidBlock {
                    block_id: block.id.clone(),
                    reason: format!("block #{order} has an empty id"),
                });
            }
            if !seen.insert(block.id.as_str()) {
                return Err(CoreError::DuplicateBlock {
                    flow_id: def.id.clone(),
                    block_id: block.id.clone(),
                });
            }

            let mut triggers = Vec::with_capacity(block.triggers.len());
            for (trigger_index, trigger) in block.triggers.iter().enumerate() {
                match Trigger::compile(trigger, options) {
                    Ok(compiled) => triggers.push(compiled),
                    Err(source) => match policy {
                        InvalidTriggerPolicy::RejectFlow => {
                            return Err(CoreError::InvalidTrigger {
                                block_id: block.id.clone(),
                                trigger_index,
                                source: Box::new(source),
                            });
                        }
                        InvalidTriggerPolicy::DropTrigger => {
                            tracing::warn!(
                                flow_id = %def.id,
                                block_id = %block.id,
                                trigger_index,
                                error = %source,
                                "dropping invalid trigger"
                            );
                            report.dropped_triggers.push(DroppedTrigger {
                                block_id: block.id.clone(),
                                trigger_index,
                                reason: source.to_string(),
                            });
                        }
                    },
                }
            }

            if triggers.is_empty() {
                report.untriggered_blocks.push(block.id.clone());
            }

            blocks.push(Block {
                id: block.id.clone(),
                triggers,
                priority: block.priority,
                scope: block.scope.clone(),
                next_state: block.next_state.clone(),
                order,
            });
        }

        tracing::debug!(
            flow_id = %def.id,
            blocks = blocks.len(),
            dropped = report.dropped_triggers.len(),
            "flow compiled"
        );

        Ok((
            Self {
                id: def.id.clone(),
                blocks,
            },
            report,
        ))
    }

    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternDef;
    use serde_json::json;

    fn greet_block(id: &str) -> BlockDef {
        BlockDef::new(id).trigger(TriggerDef::any(vec![PatternDef::exact("hi")]))
    }

    #[test]
    fn scope_wildcards_accept_everything() {
        let scope = Scope::any();
        let here = ScopeDescriptor::new("menu").with_channel("web").with_locale("en");
        assert!(scope.accepts(&here));
        assert!(scope.accepts(&ScopeDescriptor::default()));
    }

    #[test]
    fn scope_restricts_state_channel_and_locale() {
        let scope = Scope {
            states: vec!["checkout".into()],
            channels: vec!["messenger".into()],
            locales: vec!["fr".into()],
        };
        let ok = ScopeDescriptor::new("checkout")
            .with_channel("Messenger")
            .with_locale("fr");
        assert!(scope.accepts(&ok));
        assert!(!scope.accepts(&ScopeDescriptor::new("start").with_channel("messenger").with_locale("fr")));
        assert!(!scope.accepts(&ScopeDescriptor::new("checkout").with_locale("fr")));
    }

    #[test]
    fn duplicate_block_ids_are_rejected() {
        let def = FlowDef::new("f", vec![greet_block("a"), greet_block("a")]);
        let result = Flow::compile(&def, &CompileOptions::default(), InvalidTriggerPolicy::DropTrigger);
        assert!(matches!(result, Err(CoreError::DuplicateBlock { .. })));
    }

    #[test]
    fn reject_flow_policy_fails_on_bad_trigger() {
        let def = FlowDef::new(
            "f",
            vec![
                greet_block("a"),
                BlockDef::new("b").trigger(TriggerDef::any(vec![PatternDef::regex("(")])),
            ],
        );
        let err = Flow::compile(&def, &CompileOptions::default(), InvalidTriggerPolicy::RejectFlow)
            .unwrap_err();
        match err {
            CoreError::InvalidTrigger {
                block_id,
                trigger_index,
                ..
            } => {
                assert_eq!(block_id, "b");
                assert_eq!(trigger_index, 0);
            }
            other => panic!("expected InvalidTrigger, got {other:?}"),
        }
    }

    #[test]
    fn drop_trigger_policy_keeps_the_rest() {
        let def = FlowDef::new(
            "f",
            vec![
                BlockDef::new("a")
                    .trigger(TriggerDef::any(vec![PatternDef::intent("x", 2.0)]))
                    .trigger(TriggerDef::any(vec![PatternDef::exact("hi")])),
                BlockDef::new("b").trigger(TriggerDef::any(vec![])),
            ],
        );
        let (flow, report) =
            Flow::compile(&def, &CompileOptions::default(), InvalidTriggerPolicy::DropTrigger)
                .unwrap();

        assert_eq!(flow.block("a").unwrap().triggers.len(), 1);
        assert_eq!(report.dropped_triggers.len(), 2);
        assert_eq!(report.untriggered_blocks, vec!["b".to_string()]);
    }

    #[test]
    fn authoring_order_is_recorded() {
        let def = FlowDef::new("f", vec![greet_block("a"), greet_block("b")]);
        let (flow, _) =
            Flow::compile(&def, &CompileOptions::default(), InvalidTriggerPolicy::RejectFlow)
                .unwrap();
        assert_eq!(flow.block("b").unwrap().order, 1);
    }

    #[test]
    fn decodes_json_and_toml_documents() {
        let json_doc = json!({
            "id": "support",
            "blocks": [{
                "id": "greet",
                "priority": 2,
                "scope": {"channels": ["web"]},
                "triggers": [{"mode": "match_any", "patterns": [{"kind": "exact_text", "text": "hi"}]}]
            }]
        })
        .to_string();
        let flow = FlowDef::from_json(&json_doc).unwrap();
        assert_eq!(flow.blocks[0].priority, 2);

        let toml_doc = r#"
            id = "support"

            [[blocks]]
            id = "greet"
            next_state = "menu"

            [[blocks.triggers]]
            mode = "match_all"
            patterns = [{ kind = "intent", name = "greet", threshold = 0.5 }]
        "#;
        let flow = FlowDef::from_document(Path::new("support.toml"), toml_doc).unwrap();
        assert_eq!(flow.blocks[0].next_state.as_deref(), Some("menu"));
        assert_eq!(flow.blocks[0].triggers[0].patterns.len(), 1);
    }
}
