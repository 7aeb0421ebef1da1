//! Document context: retrieval strategies, chunk ranking, and prompt
//! formatting.

pub mod assembler;
pub mod retrieval;

use serde::{Deserialize, Serialize};

pub use assembler::{ContextAssembler, ContextRequest, McpContextSource};
pub use retrieval::{
    ChunkQuery, ChunkStore, HttpChunkStore, HttpVectorSearch, StoredChunk, VectorHit, VectorQuery,
    VectorSearch, VectorSearchResult,
};

// ─── Token estimation ────────────────────────────────────────────────────────

/// Estimate the number of tokens in `text`.
///
/// Rough approximation (~4 characters per token). Deliberately conservative:
/// budgets computed with it are never exceeded by real tokenisers.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

// ─── ContextStrategy ─────────────────────────────────────────────────────────

/// How document chunks are selected for the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    Vector,
    Full,
    Hybrid,
    Mcp,
    None,
}

impl std::fmt::Display for ContextStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContextStrategy::Vector => "vector",
            ContextStrategy::Full => "full",
            ContextStrategy::Hybrid => "hybrid",
            ContextStrategy::Mcp => "mcp",
            ContextStrategy::None => "none",
        };
        write!(f, "{s}")
    }
}

// ─── DocumentContextConfig ───────────────────────────────────────────────────

/// Per-agent knowledge-retrieval tuning. Every field has a contract default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentContextConfig {
    /// Explicit strategy override; wins over the agent-type default.
    pub strategy: Option<ContextStrategy>,
    pub top_k: usize,
    pub min_score: f32,
    pub max_context_tokens: usize,
    pub vector_weight: f32,
    pub full_doc_weight: f32,
    pub position_weight: f32,
    pub summary_boost: f32,
}

impl Default for DocumentContextConfig {
    fn default() -> Self {
        Self {
            strategy: None,
            top_k: 10,
            min_score: 0.7,
            max_context_tokens: 8000,
            vector_weight: 0.6,
            full_doc_weight: 0.3,
            position_weight: 0.1,
            summary_boost: 1.5,
        }
    }
}

// ─── RetrievedChunk ──────────────────────────────────────────────────────────

/// Where a retrieved chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSource {
    Vector,
    FullDoc,
    Summary,
    Mcp,
}

/// A piece of retrieved context, ranked and token-estimated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub document_name: String,
    pub content: String,
    /// Relevance in [0, 1].
    pub score: f32,
    /// Position of this chunk within its document.
    pub chunk_number: u32,
    /// Total chunks in the document, when known (0 otherwise).
    pub chunk_total: u32,
    pub estimated_tokens: usize,
    pub source: ChunkSource,
}

// ─── DocumentContextResult ───────────────────────────────────────────────────

/// The assembled context for one execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentContextResult {
    /// Chunks that made it into the prompt, in injection order.
    pub chunks: Vec<RetrievedChunk>,
    /// Formatted text ready to append to the system prompt. Empty when no
    /// context was selected.
    pub text: String,
    pub total_tokens: usize,
    pub strategy: String,
    pub truncated: bool,
    pub retrieval_ms: u64,
    /// Structured annotations (degraded retrieval, skipped sources) surfaced
    /// in `context_metadata`.
    pub notes: Vec<String>,
}

impl DocumentContextResult {
    /// A result carrying no context, tagged with the strategy that produced it.
    pub fn empty(strategy: ContextStrategy) -> Self {
        Self {
            strategy: strategy.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
