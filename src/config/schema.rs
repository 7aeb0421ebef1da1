//! TOML configuration schema for agentrelay.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly. Missing sections fall back to their `Default` impl.
//!
//! Example `~/.agentrelay/config.toml`:
//! ```toml
//! [gateway]
//! host = "127.0.0.1"
//! port = 18920
//!
//! [llm_gateway]
//! base_url = "https://llm-gateway.internal/v1"
//! api_key = "sk-..."
//!
//! [retrieval]
//! vector_base_url = "https://retrieval.internal"
//! chunk_base_url = "https://retrieval.internal"
//!
//! [mcp]
//! default_context_url = "https://mcp-context.internal"
//!
//! [database]
//! path = "/var/lib/agentrelay/executions.db"
//!
//! [[providers]]
//! name = "openai"
//! features = ["tools", "vision"]
//! est_cost_per_request = 0.002
//! ```

use serde::{Deserialize, Serialize};

// ─── GatewayConfig ───────────────────────────────────────────────────────────

/// HTTP ingress settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 18920,
        }
    }
}

// ─── LlmGatewayConfig ────────────────────────────────────────────────────────

/// Upstream LLM gateway (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmGatewayConfig {
    /// Base URL including the `/v1` prefix.
    pub base_url: String,
    /// Bearer token / API key. Empty disables the auth header.
    pub api_key: String,
    /// Send the key as `X-API-Key` instead of `Authorization: Bearer`.
    pub use_api_key_header: bool,
    /// Per-attempt timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LlmGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4000/v1".to_owned(),
            api_key: String::new(),
            use_api_key_header: false,
            request_timeout_secs: 60,
        }
    }
}

// ─── RetrievalConfig ─────────────────────────────────────────────────────────

/// Vector search + chunk retrieval collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub vector_base_url: String,
    pub chunk_base_url: String,
    /// Per-retrieval timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_base_url: "http://127.0.0.1:4100".to_owned(),
            chunk_base_url: "http://127.0.0.1:4100".to_owned(),
            request_timeout_secs: 30,
        }
    }
}

// ─── McpConfig ───────────────────────────────────────────────────────────────

/// MCP tool invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpConfig {
    /// Fallback MCP context service used when an agent has no skills but the
    /// `mcp` context strategy is selected.
    pub default_context_url: String,
    /// Per-tool invocation timeout in seconds.
    pub tool_timeout_secs: u64,
    /// Iteration cap for the tool loop.
    pub max_tool_iterations: usize,
    /// Autonomous-step budget for mcp-strategy context retrieval.
    pub context_step_budget: usize,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            default_context_url: "http://127.0.0.1:4200".to_owned(),
            tool_timeout_secs: 120,
            max_tool_iterations: 10,
            context_step_budget: 3,
        }
    }
}

// ─── MemoryConfig ────────────────────────────────────────────────────────────

/// Memory tier ceilings and consolidation cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Token ceiling of the short-term conversation buffer.
    pub short_term_max_tokens: usize,
    /// Entry ceiling of the short-term conversation buffer.
    pub short_term_max_entries: usize,
    /// Short-term TTL in seconds (inactivity).
    pub short_term_ttl_secs: u64,
    /// Token ceiling of the session working set.
    pub working_max_tokens: usize,
    /// Document ceiling of the session working set.
    pub working_max_documents: usize,
    /// Working-set TTL in seconds.
    pub working_ttl_secs: u64,
    /// Token budget handed to memory composition per execution.
    pub compose_budget_tokens: usize,
    /// Minimum short-term tokens before consolidation triggers.
    pub summary_min_tokens: usize,
    /// Minimum seconds between consolidation passes per session.
    pub consolidation_interval_secs: u64,
    /// Embedding-cache capacity for long-term recall.
    pub embedding_cache_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_max_tokens: 4000,
            short_term_max_entries: 50,
            short_term_ttl_secs: 3600,
            working_max_tokens: 8000,
            working_max_documents: 10,
            working_ttl_secs: 1800,
            compose_budget_tokens: 4000,
            summary_min_tokens: 500,
            consolidation_interval_secs: 300,
            embedding_cache_size: 10_000,
        }
    }
}

// ─── DatabaseConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite path for execution records. `":memory:"` keeps them in-process.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "agentrelay.db".to_owned(),
        }
    }
}

// ─── ProviderEntry ───────────────────────────────────────────────────────────

/// One entry of the live provider catalog consumed by fallback validation
/// and the feature/cost guards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderEntry {
    pub name: String,
    /// Advertised capability strings (e.g. `"tools"`, `"vision"`).
    #[serde(default)]
    pub features: Vec<String>,
    /// Estimated cost per request in USD, used by the fallback cost guard.
    #[serde(default)]
    pub est_cost_per_request: f64,
}

// ─── ServiceConfig ───────────────────────────────────────────────────────────

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub gateway: GatewayConfig,
    pub llm_gateway: LlmGatewayConfig,
    pub retrieval: RetrievalConfig,
    pub mcp: McpConfig,
    pub memory: MemoryConfig,
    pub database: DatabaseConfig,
    pub providers: Vec<ProviderEntry>,
}
