//! Working tier: session-scoped document context.
//!
//! Holds the documents (and their retrieved chunks) loaded during a session
//! so follow-up turns can see what the conversation is already grounded on.
//! Oldest documents are evicted once the token or document ceiling is hit.

use std::{
    collections::{HashMap, VecDeque},
    sync::RwLock,
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::context::RetrievedChunk;

use super::short_term::SessionKey;

struct WorkingPartition {
    /// Chunks grouped by document id.
    documents: HashMap<String, Vec<RetrievedChunk>>,
    /// Document insertion order, oldest first.
    order: VecDeque<String>,
    tokens: usize,
    last_active: DateTime<Utc>,
}

impl WorkingPartition {
    fn new() -> Self {
        Self {
            documents: HashMap::new(),
            order: VecDeque::new(),
            tokens: 0,
            last_active: Utc::now(),
        }
    }

    fn evict_document(&mut self) {
        if let Some(doc) = self.order.pop_front()
            && let Some(chunks) = self.documents.remove(&doc)
        {
            let freed: usize = chunks.iter().map(|c| c.estimated_tokens).sum();
            self.tokens = self.tokens.saturating_sub(freed);
        }
    }
}

/// Session-scoped document context store.
pub struct WorkingSet {
    partitions: RwLock<HashMap<SessionKey, WorkingPartition>>,
    max_tokens: usize,
    max_documents: usize,
    ttl: Duration,
}

impl WorkingSet {
    pub fn new(max_tokens: usize, max_documents: usize, ttl: Duration) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            max_tokens,
            max_documents,
            ttl,
        }
    }

    fn expired(&self, p: &WorkingPartition) -> bool {
        let idle = Utc::now().signed_duration_since(p.last_active);
        idle.to_std().map(|d| d > self.ttl).unwrap_or(false)
    }

    /// Record chunks retrieved for this session, grouped by document.
    pub fn record_chunks(&self, key: &SessionKey, chunks: &[RetrievedChunk]) {
        if chunks.is_empty() {
            return;
        }
        let Ok(mut guard) = self.partitions.write() else {
            return;
        };
        let partition = guard.entry(key.clone()).or_insert_with(WorkingPartition::new);
        if self.expired(partition) {
            partition.documents.clear();
            partition.order.clear();
            partition.tokens = 0;
        }

        for chunk in chunks {
            let doc = chunk.document_id.clone();
            let entry = partition.documents.entry(doc.clone()).or_insert_with(|| {
                partition.order.push_back(doc.clone());
                Vec::new()
            });
            if entry.iter().any(|c| c.chunk_id == chunk.chunk_id) {
                continue;
            }
            entry.push(chunk.clone());
            partition.tokens += chunk.estimated_tokens;
        }
        partition.last_active = Utc::now();

        while partition.order.len() > self.max_documents || partition.tokens > self.max_tokens {
            if partition.order.is_empty() {
                break;
            }
            partition.evict_document();
        }
    }

    /// Chunks currently loaded for this session, in document insertion order.
    pub fn chunks_for(&self, key: &SessionKey) -> Vec<RetrievedChunk> {
        let Ok(guard) = self.partitions.read() else {
            return Vec::new();
        };
        let Some(partition) = guard.get(key).filter(|p| !self.expired(p)) else {
            return Vec::new();
        };
        partition
            .order
            .iter()
            .filter_map(|doc| partition.documents.get(doc))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn document_count(&self, key: &SessionKey) -> usize {
        self.partitions
            .read()
            .ok()
            .and_then(|g| {
                g.get(key)
                    .filter(|p| !self.expired(p))
                    .map(|p| p.order.len())
            })
            .unwrap_or(0)
    }

    pub fn total_tokens(&self, key: &SessionKey) -> usize {
        self.partitions
            .read()
            .ok()
            .and_then(|g| g.get(key).filter(|p| !self.expired(p)).map(|p| p.tokens))
            .unwrap_or(0)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
