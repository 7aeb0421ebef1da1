//! Resolution of an agent's skills into a flat tool catalog.
//!
//! Each MCP skill is asked for its tool descriptors; allow-lists filter,
//! names union first-wins, and a routing table maps every tool name back to
//! the server that owns it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::Agent;
use crate::error::{ExecError, ExecResult};
use crate::mcp::{McpClient, McpToolDescriptor};
use crate::router::ToolDescriptor;

use super::{SkillKind, SkillStore};

// ─── ToolCatalog ─────────────────────────────────────────────────────────────

/// The flat tool surface for one execution: OpenAI-shaped descriptors plus
/// an invocation routing table.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    pub tools: Vec<ToolDescriptor>,
    /// Tool name → MCP server base URL.
    pub routes: HashMap<String, String>,
    /// Server used for tool names with no explicit route.
    pub default_url: Option<String>,
}

impl ToolCatalog {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve the server responsible for `tool_name`.
    pub fn route_for(&self, tool_name: &str) -> Option<&str> {
        self.routes
            .get(tool_name)
            .map(String::as_str)
            .or(self.default_url.as_deref())
    }

    /// Tool names in catalog order, for the system-prompt tool hint.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    fn add(&mut self, descriptor: McpToolDescriptor, base_url: &str) {
        // First skill to contribute a name wins.
        if self.routes.contains_key(&descriptor.name) {
            return;
        }
        self.routes
            .insert(descriptor.name.clone(), base_url.to_string());
        self.tools.push(ToolDescriptor {
            name: descriptor.name,
            description: descriptor.description,
            parameters: descriptor.input_schema,
        });
    }
}

// ─── ToolResolver ────────────────────────────────────────────────────────────

/// Resolves skill ids to a [`ToolCatalog`] by querying each MCP server.
pub struct ToolResolver {
    skills: Arc<dyn SkillStore>,
    mcp: Arc<dyn McpClient>,
    default_context_url: String,
}

impl ToolResolver {
    pub fn new(
        skills: Arc<dyn SkillStore>,
        mcp: Arc<dyn McpClient>,
        default_context_url: impl Into<String>,
    ) -> Self {
        Self {
            skills,
            mcp,
            default_context_url: default_context_url.into(),
        }
    }

    /// Resolve the agent's skills. A referenced skill that does not exist is
    /// a hard `not_found`; an MCP server that fails discovery is skipped and
    /// noted (collaborator fail-soft).
    #[tracing::instrument(skip_all, fields(agent = %agent.id, skills = agent.skill_ids.len()))]
    pub async fn resolve(&self, agent: &Agent) -> ExecResult<(ToolCatalog, Vec<String>)> {
        let mut catalog = ToolCatalog::default();
        let mut notes = Vec::new();

        for skill_id in &agent.skill_ids {
            let skill = self
                .skills
                .get(skill_id)
                .await?
                .ok_or_else(|| ExecError::NotFound(format!("skill '{skill_id}'")))?;

            let SkillKind::Mcp {
                base_url,
                allowed_tools,
            } = &skill.kind
            else {
                tracing::debug!(skill = %skill.id, "non-mcp skill contributes no tools");
                continue;
            };

            let descriptors = match self.mcp.list_tools(base_url).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(skill = %skill.id, error = %e, "tool discovery failed");
                    notes.push(format!("skill '{}' unavailable: {}", skill.id, e.class()));
                    continue;
                }
            };

            for descriptor in descriptors {
                if let Some(allowed) = allowed_tools
                    && !allowed.iter().any(|a| a == &descriptor.name)
                {
                    continue;
                }
                catalog.add(descriptor, base_url);
            }
        }

        Ok((catalog, notes))
    }

    /// Catalog for the default MCP context service, used when an agent has
    /// no skills but the `mcp` context strategy is selected.
    pub async fn resolve_default_context(&self) -> ExecResult<ToolCatalog> {
        let descriptors = self.mcp.list_tools(&self.default_context_url).await?;
        let mut catalog = ToolCatalog {
            default_url: Some(self.default_context_url.clone()),
            ..ToolCatalog::default()
        };
        for descriptor in descriptors {
            catalog.add(descriptor, &self.default_context_url);
        }
        Ok(catalog)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
