//! The `Agent` record: a named configuration describing how to execute one
//! LLM request pipeline.
//!
//! Agents are immutable for the duration of an execution. The five agent
//! types differ only in defaults (context strategy) and tool availability,
//! so they are represented as a single record with a `type` tag rather than
//! a type hierarchy.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    context::{ContextStrategy, DocumentContextConfig},
    error::{ExecError, ExecResult},
    router::{FallbackConfig, OptimizeFor, RetryConfig},
};

// ─── AgentType ───────────────────────────────────────────────────────────────

/// Behavioural flavour of an agent. Drives the default context strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Qa,
    #[default]
    Conversational,
    Producer,
    Workflow,
    Api,
    Hybrid,
}

impl AgentType {
    /// Default context strategy when the agent carries no explicit override.
    pub fn default_strategy(&self) -> ContextStrategy {
        match self {
            AgentType::Producer => ContextStrategy::Full,
            AgentType::Qa | AgentType::Conversational => ContextStrategy::Vector,
            _ => ContextStrategy::Vector,
        }
    }
}

// ─── Agent ───────────────────────────────────────────────────────────────────

/// A stored agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    // Identity
    pub id: String,
    pub owner_id: String,
    pub space_id: String,
    pub tenant_id: String,

    // Behaviour
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub system_prompt: String,
    #[serde(rename = "type", default)]
    pub agent_type: AgentType,

    // LLM config
    #[serde(default)]
    pub provider_preference: Option<String>,
    pub model_preference: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    #[serde(default)]
    pub optimize_for: OptimizeFor,
    #[serde(default)]
    pub max_cost_usd: f64,
    #[serde(default)]
    pub required_features: Vec<String>,

    // Reliability config
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub fallback: Option<FallbackConfig>,

    // Knowledge config
    #[serde(default)]
    pub enable_knowledge: bool,
    #[serde(default)]
    pub notebook_ids: Vec<Uuid>,
    #[serde(default)]
    pub document_context: Option<DocumentContextConfig>,

    // Memory config
    #[serde(default)]
    pub enable_memory: bool,

    // Tools
    #[serde(default)]
    pub skill_ids: Vec<String>,
}

impl Agent {
    /// A minimally-configured agent with contract defaults; used by wiring
    /// code and tests.
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        agent_type: AgentType,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: String::new(),
            space_id: String::new(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            description: None,
            system_prompt: system_prompt.into(),
            agent_type,
            provider_preference: None,
            model_preference: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            top_p: 1.0,
            optimize_for: OptimizeFor::default(),
            max_cost_usd: 0.0,
            required_features: Vec::new(),
            retry: None,
            fallback: None,
            enable_knowledge: false,
            notebook_ids: Vec::new(),
            document_context: None,
            enable_memory: false,
            skill_ids: Vec::new(),
        }
    }

    /// Enforce the record invariants.
    pub fn validate(&self) -> ExecResult<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ExecError::Validation(format!(
                "temperature must be in [0, 2], got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ExecError::Validation(format!(
                "top_p must be in [0, 1], got {}",
                self.top_p
            )));
        }
        if self.max_tokens == 0 {
            return Err(ExecError::Validation("max_tokens must be > 0".to_string()));
        }
        if self.max_cost_usd < 0.0 {
            return Err(ExecError::Validation(
                "max_cost_usd must be >= 0".to_string(),
            ));
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(fallback) = &self.fallback
            && !(0.0..=2.0).contains(&fallback.max_cost_increase)
        {
            return Err(ExecError::Validation(format!(
                "fallback.max_cost_increase must be in [0, 2], got {}",
                fallback.max_cost_increase
            )));
        }
        Ok(())
    }

    /// Whether a caller identified by `(user_id, tenant_id)` may execute this
    /// agent: the owner always can, otherwise tenant scopes must match.
    pub fn allows_access(&self, user_id: &str, tenant_id: &str) -> bool {
        (!user_id.is_empty() && self.owner_id == user_id)
            || (!tenant_id.is_empty() && self.tenant_id == tenant_id)
    }

    /// The context strategy in effect for this agent (explicit override wins,
    /// else the type default).
    pub fn effective_strategy(&self) -> ContextStrategy {
        self.document_context
            .as_ref()
            .and_then(|c| c.strategy)
            .unwrap_or_else(|| self.agent_type.default_strategy())
    }

    /// The document-context tuning in effect (agent override or defaults).
    pub fn effective_document_context(&self) -> DocumentContextConfig {
        self.document_context.clone().unwrap_or_default()
    }

    /// The retry policy in effect (agent override or the default preset).
    pub fn effective_retry(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    /// The fallback policy in effect (agent override or disabled).
    pub fn effective_fallback(&self) -> FallbackConfig {
        self.fallback.clone().unwrap_or_default()
    }

    pub fn has_skills(&self) -> bool {
        !self.skill_ids.is_empty()
    }
}

// ─── AgentStore ──────────────────────────────────────────────────────────────

/// Read access to stored agents, keyed by agent id. CRUD lives elsewhere;
/// the execution core only ever loads.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get(&self, id: &str) -> ExecResult<Option<Agent>>;
}

/// Thread-safe in-process agent store.
pub struct InMemoryAgentStore {
    agents: RwLock<HashMap<String, Agent>>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent. Overwrites any previous agent with the same id.
    pub fn insert(&self, agent: Agent) {
        if let Ok(mut guard) = self.agents.write() {
            guard.insert(agent.id.clone(), agent);
        }
    }
}

impl Default for InMemoryAgentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn get(&self, id: &str) -> ExecResult<Option<Agent>> {
        let guard = self
            .agents
            .read()
            .map_err(|e| ExecError::Internal(format!("agent store lock poisoned: {e}")))?;
        Ok(guard.get(id).cloned())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
