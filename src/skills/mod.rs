//! Skills: named capability bundles an agent can carry, and their
//! resolution into a flat tool catalog.

pub mod registry;

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ExecError, ExecResult};

pub use registry::{ToolCatalog, ToolResolver};

// ─── Skill ───────────────────────────────────────────────────────────────────

/// How a skill exposes its tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SkillKind {
    /// An MCP server reachable over HTTP.
    Mcp {
        base_url: String,
        /// Restrict to these tool names when present.
        #[serde(default)]
        allowed_tools: Option<Vec<String>>,
    },
    /// A provider-native function (no MCP routing).
    Function,
    /// A capability built into the service.
    Builtin,
}

/// A stored skill definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: SkillKind,
}

impl Skill {
    pub fn mcp(
        id: impl Into<String>,
        name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            kind: SkillKind::Mcp {
                base_url: base_url.into(),
                allowed_tools: None,
            },
        }
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        if let SkillKind::Mcp { allowed_tools, .. } = &mut self.kind {
            *allowed_tools = Some(tools);
        }
        self
    }
}

// ─── SkillStore ──────────────────────────────────────────────────────────────

/// Read access to stored skills, keyed by skill id.
#[async_trait]
pub trait SkillStore: Send + Sync {
    async fn get(&self, id: &str) -> ExecResult<Option<Skill>>;
}

/// Thread-safe in-process skill store.
pub struct InMemorySkillStore {
    skills: RwLock<HashMap<String, Skill>>,
}

impl InMemorySkillStore {
    pub fn new() -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, skill: Skill) {
        if let Ok(mut guard) = self.skills.write() {
            guard.insert(skill.id.clone(), skill);
        }
    }
}

impl Default for InMemorySkillStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SkillStore for InMemorySkillStore {
    async fn get(&self, id: &str) -> ExecResult<Option<Skill>> {
        let guard = self
            .skills
            .read()
            .map_err(|e| ExecError::Internal(format!("skill store lock poisoned: {e}")))?;
        Ok(guard.get(id).cloned())
    }
}
