//! Context assembly: strategy selection, retrieval, ranking, and prompt
//! formatting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::ExecResult;

use super::{
    ChunkQuery, ChunkSource, ChunkStore, ContextStrategy, DocumentContextConfig,
    DocumentContextResult, RetrievedChunk, StoredChunk, VectorHit, VectorQuery, VectorSearch,
    estimate_tokens,
};

/// Header line of the injected context section.
const CONTEXT_HEADER: &str = "--- RELEVANT DOCUMENTS ---";

/// Tier share of the token budget for hybrid packing.
const HIGH_TIER_SHARE: f32 = 0.5;
const MEDIUM_TIER_SHARE: f32 = 0.3;
const CONTEXT_TIER_SHARE: f32 = 0.2;

/// Combined-score thresholds for the hybrid tiers.
const HIGH_TIER_MIN_SCORE: f32 = 0.8;
const MEDIUM_TIER_MIN_SCORE: f32 = 0.6;

// ─── McpContextSource ────────────────────────────────────────────────────────

/// Autonomous context retrieval through the tool loop, used by the `mcp`
/// strategy. Implemented next to the tool loop; the assembler only formats
/// whatever chunks come back.
#[async_trait]
pub trait McpContextSource: Send + Sync {
    async fn retrieve(
        &self,
        agent: &Agent,
        input: &str,
        max_steps: usize,
    ) -> ExecResult<Vec<RetrievedChunk>>;
}

// ─── ContextRequest ──────────────────────────────────────────────────────────

/// Request-scoped inputs to context assembly.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    pub input: String,
    pub tenant_id: String,
    pub auth_token: String,
    /// Per-request notebook override; `None` uses the agent's default set.
    pub notebook_ids_override: Option<Vec<Uuid>>,
    /// Restrict retrieval to these documents.
    pub selected_documents: Option<Vec<Uuid>>,
    pub disable_knowledge: bool,
}

// ─── ContextAssembler ────────────────────────────────────────────────────────

/// Selects a retrieval strategy per execution and produces formatted context
/// under a token budget.
pub struct ContextAssembler {
    vector: Arc<dyn VectorSearch>,
    chunks: Arc<dyn ChunkStore>,
    mcp_source: Option<Arc<dyn McpContextSource>>,
    mcp_step_budget: usize,
}

impl ContextAssembler {
    pub fn new(vector: Arc<dyn VectorSearch>, chunks: Arc<dyn ChunkStore>) -> Self {
        Self {
            vector,
            chunks,
            mcp_source: None,
            mcp_step_budget: 3,
        }
    }

    /// Attach the autonomous retrieval source for the `mcp` strategy.
    pub fn with_mcp_source(mut self, source: Arc<dyn McpContextSource>, step_budget: usize) -> Self {
        self.mcp_source = Some(source);
        self.mcp_step_budget = step_budget;
        self
    }

    /// Resolve the strategy in effect for `(agent, request)`.
    ///
    /// Knowledge disabled on either side, or an empty notebook/document
    /// scope, short-circuits to [`ContextStrategy::None`].
    pub fn select_strategy(agent: &Agent, request: &ContextRequest) -> ContextStrategy {
        if request.disable_knowledge || !agent.enable_knowledge {
            return ContextStrategy::None;
        }
        let notebooks = request
            .notebook_ids_override
            .as_deref()
            .unwrap_or(&agent.notebook_ids);
        let has_selection = request
            .selected_documents
            .as_deref()
            .is_some_and(|d| !d.is_empty());
        if notebooks.is_empty() && !has_selection {
            return ContextStrategy::None;
        }
        agent.effective_strategy()
    }

    /// Produce the document context for one execution.
    #[tracing::instrument(skip_all, fields(agent = %agent.id))]
    pub async fn assemble(
        &self,
        agent: &Agent,
        request: &ContextRequest,
    ) -> ExecResult<DocumentContextResult> {
        let strategy = Self::select_strategy(agent, request);
        if strategy == ContextStrategy::None {
            return Ok(DocumentContextResult::empty(ContextStrategy::None));
        }

        let config = agent.effective_document_context();
        let started = Instant::now();

        let mut result = match strategy {
            ContextStrategy::Vector => {
                let chunks = self.retrieve_vector(agent, request, &config).await?;
                format_context(chunks, &config, ContextStrategy::Vector, false)
            }
            ContextStrategy::Full => {
                let chunks = self.retrieve_full(agent, request).await?;
                format_context(chunks, &config, ContextStrategy::Full, false)
            }
            ContextStrategy::Hybrid => self.assemble_hybrid(agent, request, &config).await?,
            ContextStrategy::Mcp => match &self.mcp_source {
                Some(source) => {
                    let chunks = source
                        .retrieve(agent, &request.input, self.mcp_step_budget)
                        .await?;
                    format_context(chunks, &config, ContextStrategy::Mcp, false)
                }
                None => {
                    let mut r = DocumentContextResult::empty(ContextStrategy::Mcp);
                    r.notes
                        .push("mcp context source not configured".to_string());
                    r
                }
            },
            ContextStrategy::None => DocumentContextResult::empty(ContextStrategy::None),
        };

        result.retrieval_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    // ── Vector strategy ──────────────────────────────────────────────────

    async fn retrieve_vector(
        &self,
        agent: &Agent,
        request: &ContextRequest,
        config: &DocumentContextConfig,
    ) -> ExecResult<Vec<RetrievedChunk>> {
        let hits = self.vector_hits(agent, request, config).await?;
        let mut chunks: Vec<RetrievedChunk> = hits
            .into_iter()
            .filter(|h| h.score >= config.min_score)
            .map(chunk_from_hit)
            .collect();
        chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(chunks)
    }

    async fn vector_hits(
        &self,
        agent: &Agent,
        request: &ContextRequest,
        config: &DocumentContextConfig,
    ) -> ExecResult<Vec<VectorHit>> {
        let notebooks = request
            .notebook_ids_override
            .clone()
            .unwrap_or_else(|| agent.notebook_ids.clone());
        let query = VectorQuery {
            query_text: request.input.clone(),
            notebook_ids: notebooks,
            document_ids: request.selected_documents.clone(),
            tenant_id: request.tenant_id.clone(),
            top_k: config.top_k,
            min_score: config.min_score,
            auth_token: request.auth_token.clone(),
        };
        Ok(self.vector.search(&query).await?.results)
    }

    // ── Full strategy ────────────────────────────────────────────────────

    async fn retrieve_full(
        &self,
        agent: &Agent,
        request: &ContextRequest,
    ) -> ExecResult<Vec<RetrievedChunk>> {
        let stored = self.corpus_chunks(agent, request).await?;
        Ok(stored.into_iter().map(chunk_from_stored).collect())
    }

    async fn corpus_chunks(
        &self,
        agent: &Agent,
        request: &ContextRequest,
    ) -> ExecResult<Vec<StoredChunk>> {
        let notebooks = request
            .notebook_ids_override
            .clone()
            .unwrap_or_else(|| agent.notebook_ids.clone());
        let query = ChunkQuery {
            tenant_id: request.tenant_id.clone(),
            notebook_ids: (!notebooks.is_empty()).then_some(notebooks),
            file_ids: request.selected_documents.clone(),
            limit: None,
            offset: None,
            order_by: "chunk_number",
            auth_token: request.auth_token.clone(),
        };
        self.chunks.fetch(&query).await
    }

    // ── Hybrid strategy ──────────────────────────────────────────────────

    async fn assemble_hybrid(
        &self,
        agent: &Agent,
        request: &ContextRequest,
        config: &DocumentContextConfig,
    ) -> ExecResult<DocumentContextResult> {
        let (vector_hits, corpus) = tokio::join!(
            self.vector_hits(agent, request, config),
            self.corpus_chunks(agent, request),
        );
        let vector_hits = vector_hits?;
        let corpus = corpus?;

        // Union keyed by content hash, accumulating the per-source scores.
        struct Scored {
            chunk: RetrievedChunk,
            vector_score: f32,
            full_doc_score: f32,
            is_summary: bool,
        }
        let mut by_hash: HashMap<String, Scored> = HashMap::new();

        for hit in vector_hits {
            if hit.score < config.min_score {
                continue;
            }
            let key = content_hash(&hit.content);
            let entry = by_hash.entry(key).or_insert_with(|| Scored {
                chunk: chunk_from_hit(hit.clone()),
                vector_score: 0.0,
                full_doc_score: 0.0,
                is_summary: hit.is_summary,
            });
            entry.vector_score = entry.vector_score.max(hit.score);
            entry.is_summary |= hit.is_summary;
        }

        for stored in corpus {
            let key = stored
                .content_hash
                .clone()
                .unwrap_or_else(|| content_hash(&stored.content));
            let is_summary = stored.is_summary;
            let entry = by_hash.entry(key).or_insert_with(|| Scored {
                chunk: chunk_from_stored(stored),
                vector_score: 0.0,
                full_doc_score: 0.0,
                is_summary,
            });
            entry.full_doc_score = 1.0;
            entry.is_summary |= is_summary;
        }

        // Combined score with position decay and summary boost.
        let mut ranked: Vec<RetrievedChunk> = by_hash
            .into_values()
            .map(|s| {
                let position_score = position_decay(s.chunk.chunk_number);
                let mut combined = s.vector_score * config.vector_weight
                    + s.full_doc_score * config.full_doc_weight
                    + position_score * config.position_weight;
                if s.is_summary {
                    combined *= config.summary_boost;
                }
                let mut chunk = s.chunk;
                chunk.score = combined.clamp(0.0, 1.0);
                if s.is_summary {
                    chunk.source = ChunkSource::Summary;
                }
                chunk
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        // Allocate the token budget across priority tiers.
        let budget = config.max_context_tokens as f32;
        let tiers: [(f32, f32, Option<f32>); 3] = [
            (HIGH_TIER_MIN_SCORE, budget * HIGH_TIER_SHARE, None),
            (
                MEDIUM_TIER_MIN_SCORE,
                budget * MEDIUM_TIER_SHARE,
                Some(HIGH_TIER_MIN_SCORE),
            ),
            (0.0, budget * CONTEXT_TIER_SHARE, Some(MEDIUM_TIER_MIN_SCORE)),
        ];

        let mut selected: Vec<RetrievedChunk> = Vec::new();
        for (min, tier_budget, max) in tiers {
            let mut remaining = tier_budget as usize;
            for chunk in ranked
                .iter()
                .filter(|c| c.score >= min && max.is_none_or(|m| c.score < m))
            {
                let block = estimate_tokens(&format_block(chunk));
                if block > remaining {
                    break;
                }
                remaining -= block;
                selected.push(chunk.clone());
            }
        }

        let dropped = selected.len() < ranked.len();
        let mut result = format_context(selected, config, ContextStrategy::Hybrid, dropped);
        result.truncated |= dropped;
        Ok(result)
    }
}

// ─── Scoring helpers ─────────────────────────────────────────────────────────

/// Monotone decay over document position; chunk 0 scores 1.0.
fn position_decay(chunk_number: u32) -> f32 {
    1.0 / (1.0 + chunk_number as f32 * 0.1)
}

/// Stable content hash used for deduplication.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn chunk_from_hit(hit: VectorHit) -> RetrievedChunk {
    let estimated_tokens = estimate_tokens(&hit.content);
    RetrievedChunk {
        chunk_id: hit.chunk_id,
        document_name: hit
            .document_name
            .unwrap_or_else(|| hit.document_id.clone()),
        document_id: hit.document_id,
        content: hit.content,
        score: hit.score,
        chunk_number: hit.chunk_number,
        chunk_total: 0,
        estimated_tokens,
        source: if hit.is_summary {
            ChunkSource::Summary
        } else {
            ChunkSource::Vector
        },
    }
}

fn chunk_from_stored(stored: StoredChunk) -> RetrievedChunk {
    let estimated_tokens = estimate_tokens(&stored.content);
    RetrievedChunk {
        chunk_id: stored.id,
        document_name: stored.file_name.unwrap_or_else(|| stored.file_id.clone()),
        document_id: stored.file_id,
        content: stored.content,
        score: 1.0,
        chunk_number: stored.chunk_number,
        chunk_total: 0,
        estimated_tokens,
        source: if stored.is_summary {
            ChunkSource::Summary
        } else {
            ChunkSource::FullDoc
        },
    }
}

// ─── Formatting ──────────────────────────────────────────────────────────────

fn format_block(chunk: &RetrievedChunk) -> String {
    let total = chunk.chunk_total.max(chunk.chunk_number + 1);
    format!(
        "[Document: {}] (score={:.2}, chunk {}/{})\n{}\n",
        chunk.document_name,
        chunk.score,
        chunk.chunk_number + 1,
        total,
        chunk.content
    )
}

/// Emit the context section, accumulating chunks until the next one would
/// exceed the budget. The token estimate is conservative, so the budget is
/// never exceeded.
pub fn format_context(
    chunks: Vec<RetrievedChunk>,
    config: &DocumentContextConfig,
    strategy: ContextStrategy,
    already_truncated: bool,
) -> DocumentContextResult {
    let mut result = DocumentContextResult::empty(strategy);
    result.truncated = already_truncated;
    if chunks.is_empty() {
        return result;
    }

    let budget = config.max_context_tokens;
    let mut text = String::from(CONTEXT_HEADER);
    text.push('\n');
    let mut used = estimate_tokens(&text);

    for chunk in chunks {
        let block = format_block(&chunk);
        let block_tokens = estimate_tokens(&block);
        if used + block_tokens > budget {
            result.truncated = true;
            break;
        }
        text.push('\n');
        text.push_str(&block);
        used += block_tokens;
        result.chunks.push(chunk);
    }

    if result.chunks.is_empty() {
        // Nothing fit: emit no section at all.
        result.text = String::new();
        result.total_tokens = 0;
        return result;
    }

    result.text = text;
    result.total_tokens = used;
    result
}

// ─── Tests ───────────────────────────────────────────────────────────────────
