//! Long-term tier: agent-scoped summaries, facts, and insights retrievable
//! by semantic similarity.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ExecError, ExecResult};

use super::embeddings::{EmbeddingProvider, cosine_similarity};

// ─── MemoryKind ──────────────────────────────────────────────────────────────

/// Semantic classification of a long-term entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Summary,
    Fact,
    Insight,
}

// ─── LongTermEntry ───────────────────────────────────────────────────────────

/// A long-term memory record returned by recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermEntry {
    pub id: String,
    pub agent_id: String,
    pub content: String,
    pub kind: MemoryKind,
    /// Relevance to the current query, in [0, 1].
    pub score: f32,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u32,
}

// ─── LongTermMemory seam ─────────────────────────────────────────────────────

/// Agent-scoped long-term store. Recall returns entries sorted by descending
/// relevance and bumps their access bookkeeping.
#[async_trait]
pub trait LongTermMemory: Send + Sync {
    async fn append(&self, agent_id: &str, kind: MemoryKind, content: &str) -> ExecResult<String>;

    async fn recall(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
    ) -> ExecResult<Vec<LongTermEntry>>;

    async fn count(&self, agent_id: &str) -> ExecResult<usize>;
}

// ─── InMemoryLongTerm ────────────────────────────────────────────────────────

struct StoredEntry {
    entry: LongTermEntry,
    embedding: Vec<f32>,
}

/// HashMap-backed long-term store with embedding-similarity recall.
pub struct InMemoryLongTerm {
    entries: RwLock<HashMap<String, Vec<StoredEntry>>>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl InMemoryLongTerm {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            embedder,
        }
    }
}

#[async_trait]
impl LongTermMemory for InMemoryLongTerm {
    async fn append(&self, agent_id: &str, kind: MemoryKind, content: &str) -> ExecResult<String> {
        let embedding = self.embedder.embed(content).await?;
        let now = Utc::now();
        let entry = LongTermEntry {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            content: content.to_string(),
            kind,
            score: 0.0,
            created_at: now,
            accessed_at: now,
            access_count: 0,
        };
        let id = entry.id.clone();
        let mut guard = self
            .entries
            .write()
            .map_err(|e| ExecError::Internal(format!("long-term store poisoned: {e}")))?;
        guard
            .entry(agent_id.to_string())
            .or_default()
            .push(StoredEntry { entry, embedding });
        Ok(id)
    }

    async fn recall(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
    ) -> ExecResult<Vec<LongTermEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query).await?;

        let mut guard = self
            .entries
            .write()
            .map_err(|e| ExecError::Internal(format!("long-term store poisoned: {e}")))?;
        let Some(stored) = guard.get_mut(agent_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, usize)> = stored
            .iter()
            .enumerate()
            .map(|(i, s)| (cosine_similarity(&query_embedding, &s.embedding), i))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(limit);

        let now = Utc::now();
        let mut results = Vec::with_capacity(scored.len());
        for (score, idx) in scored {
            let s = &mut stored[idx];
            s.entry.accessed_at = now;
            s.entry.access_count += 1;
            let mut entry = s.entry.clone();
            entry.score = score;
            results.push(entry);
        }
        Ok(results)
    }

    async fn count(&self, agent_id: &str) -> ExecResult<usize> {
        let guard = self
            .entries
            .read()
            .map_err(|e| ExecError::Internal(format!("long-term store poisoned: {e}")))?;
        Ok(guard.get(agent_id).map(Vec::len).unwrap_or(0))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
