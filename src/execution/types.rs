//! Request and response shapes for one execution.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::router::MessageRole;

/// One prior conversation turn supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: MessageRole,
    pub content: String,
}

/// A transient execution request. Owned exclusively by the orchestrator for
/// the request's lifetime.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub agent_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub session_id: Option<String>,
    pub input: String,
    pub history: Vec<HistoryMessage>,
    pub notebook_ids_override: Option<Vec<Uuid>>,
    pub selected_documents: Option<Vec<Uuid>>,
    pub disable_knowledge: bool,
    /// Bearer token forwarded to the retrieval collaborators.
    pub auth_token: String,
}

impl ExecutionRequest {
    pub fn new(
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            input: input.into(),
            ..Self::default()
        }
    }
}

/// Structured annotations describing how context was (or wasn't) assembled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub strategy: String,
    pub knowledge_enabled: bool,
    pub context_empty: bool,
    pub chunk_count: usize,
    pub context_tokens: usize,
    pub truncated: bool,
    pub memory_tokens: usize,
    pub memory_truncated: bool,
    /// Degradation notes: collaborator failures, skipped skills.
    pub annotations: Vec<String>,
}

/// Response metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub model: String,
    pub provider: String,
    pub routing_strategy: String,
    pub response_time_ms: u64,
    pub context_metadata: ContextMetadata,
    pub mcp_tools_used: bool,
}

/// The caller-facing result of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub execution_id: String,
    /// Session continuity id: the supplied session id, or a fresh one.
    pub conversation_id: String,
    pub output: String,
    pub tokens_used: u32,
    pub cost_usd: f64,
    pub metadata: ExecutionMetadata,
}
