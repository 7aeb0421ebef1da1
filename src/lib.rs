//! agentrelay — a multi-tenant AI agent execution service.
//!
//! Stored agent configurations are executed against user input by assembling
//! document context and tiered memory, routing a reliability-managed call
//! through an upstream LLM gateway (with retry and provider fallback),
//! orchestrating an MCP tool loop when the agent carries skills, and
//! recording a durable execution record with full reliability telemetry.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod mcp;
pub mod memory;
pub mod router;
pub mod skills;

/// Convenience re-exports for the most commonly used types across the
/// agentrelay codebase.
///
/// ```rust
/// use agentrelay::prelude::*;
/// ```
pub mod prelude {
    // Errors
    pub use crate::error::{ErrorClass, ExecError, ExecResult};

    // Agent model
    pub use crate::agent::{Agent, AgentStore, AgentType, InMemoryAgentStore};

    // Router + reliability
    pub use crate::router::{
        CancelFlag, FallbackConfig, Message, MessageRole, PolicyFailure, ProviderCatalog,
        ProviderInfo, ReliabilityTelemetry, ReliableRouter, RetryConfig, Router, RouterRequest,
        RouterResponse,
    };

    // Context
    pub use crate::context::{
        ContextAssembler, ContextStrategy, DocumentContextConfig, DocumentContextResult,
        RetrievedChunk,
    };

    // Memory
    pub use crate::memory::{MemoryManager, SessionKey};

    // Skills + MCP
    pub use crate::mcp::{HttpMcpClient, McpClient};
    pub use crate::skills::{InMemorySkillStore, Skill, SkillStore, ToolCatalog, ToolResolver};

    // Execution
    pub use crate::execution::{
        ExecutionRecord, ExecutionRecorder, ExecutionRequest, ExecutionResponse, ExecutionStatus,
        Orchestrator, SqliteRecorder,
    };

    // Configuration
    pub use crate::config::{ServiceConfig, load_default_config};
}
