//! Flow store collaborator.
//!
//! The authoring side owns flow persistence; the engine only reads.  Two
//! implementations ship:
//!
//! - [`MemoryFlowStore`] -- a concurrent in-memory map, handy for tests and
//!   embedding.
//! - [`FileFlowStore`] -- a directory of `<flow_id>.json` / `<flow_id>.toml`
//!   documents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use blockroute_core::FlowDef;
use dashmap::DashMap;

use crate::error::{EngineError, Result};

/// Read access to persisted flows.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Load a flow definition by id.
    ///
    /// Returns [`EngineError::FlowNotFound`] when no such flow exists.
    async fn load_flow(&self, flow_id: &str) -> Result<FlowDef>;

    /// Ids of every stored flow, sorted.
    async fn list_flows(&self) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Thread-safe in-memory store.  Cloning shares the same map.
#[derive(Clone, Default)]
pub struct MemoryFlowStore {
    flows: Arc<DashMap<String, FlowDef>>,
}

impl MemoryFlowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a flow; returns the previous definition.
    pub fn put(&self, flow: FlowDef) -> Option<FlowDef> {
        tracing::debug!(flow_id = %flow.id, blocks = flow.blocks.len(), "flow stored");
        self.flows.insert(flow.id.clone(), flow)
    }

    pub fn remove(&self, flow_id: &str) -> Option<FlowDef> {
        self.flows.remove(flow_id).map(|(_, flow)| flow)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn load_flow(&self, flow_id: &str) -> Result<FlowDef> {
        self.flows
            .get(flow_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::FlowNotFound {
                flow_id: flow_id.to_string(),
            })
    }

    async fn list_flows(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.flows.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// Extensions probed by [`FileFlowStore`], in order.
const FLOW_EXTENSIONS: [&str; 2] = ["json", "toml"];

/// Flows stored as documents in one directory.
#[derive(Debug, Clone)]
pub struct FileFlowStore {
    root: PathBuf,
}

impl FileFlowStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn locate(&self, flow_id: &str) -> Result<PathBuf> {
        // Ids become file names, so anything that could escape the root is
        // treated as unknown.
        if flow_id.is_empty() || flow_id.contains(['/', '\\']) || flow_id.starts_with('.') {
            return Err(EngineError::FlowNotFound {
                flow_id: flow_id.to_string(),
            });
        }
        for ext in FLOW_EXTENSIONS {
            let path = self.root.join(format!("{flow_id}.{ext}"));
            if tokio::fs::try_exists(&path).await? {
                return Ok(path);
            }
        }
        Err(EngineError::FlowNotFound {
            flow_id: flow_id.to_string(),
        })
    }
}

#[async_trait]
impl FlowStore for FileFlowStore {
    async fn load_flow(&self, flow_id: &str) -> Result<FlowDef> {
        let path = self.locate(flow_id).await?;
        let flow = load_flow_file(&path).await?;
        if flow.id != flow_id {
            tracing::warn!(
                path = %path.display(),
                expected = flow_id,
                found = %flow.id,
                "flow id does not match its file name"
            );
        }
        Ok(flow)
    }

    async fn list_flows(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let known = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FLOW_EXTENSIONS.contains(&e));
            if !known {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

/// Read and decode one flow document (`.toml` is TOML, anything else JSON).
pub async fn load_flow_file(path: &Path) -> Result<FlowDef> {
    let text = tokio::fs::read_to_string(path).await?;
    let flow = FlowDef::from_document(path, &text)?;
    tracing::debug!(path = %path.display(), flow_id = %flow.id, "flow document loaded");
    Ok(flow)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
