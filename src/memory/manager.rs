//! Memory composition, write-back, and consolidation.
//!
//! The manager fronts the three tiers. Every operation is fail-soft: memory
//! errors are logged and swallowed, never failing an execution.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::MemoryConfig;
use crate::context::{RetrievedChunk, estimate_tokens};
use crate::router::MessageRole;

use super::{
    long_term::{LongTermMemory, MemoryKind},
    short_term::{SessionKey, ShortTermBuffer},
    working::WorkingSet,
};

/// Budget split between the tiers during composition.
const SHORT_TERM_SHARE: f32 = 0.6;
const LONG_TERM_SHARE: f32 = 0.4;

/// Entries recalled from the long-term tier per execution.
const LONG_TERM_RECALL_LIMIT: usize = 5;

/// Ceiling on an extractive consolidation summary.
const SUMMARY_MAX_CHARS: usize = 480;

// ─── MemoryContext ───────────────────────────────────────────────────────────

/// Formatted memory for one execution, injected as system messages
/// (long-term first).
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub long_term_text: Option<String>,
    pub short_term_text: Option<String>,
    pub total_tokens: usize,
    pub truncated: bool,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.long_term_text.is_none() && self.short_term_text.is_none()
    }
}

/// Outcome of one consolidation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsolidationStats {
    pub summaries_created: u32,
    pub tokens_saved: usize,
}

// ─── MemoryManager ───────────────────────────────────────────────────────────

/// Fronts the short-term, working, and long-term tiers.
pub struct MemoryManager {
    short_term: ShortTermBuffer,
    working: WorkingSet,
    long_term: Arc<dyn LongTermMemory>,
    config: MemoryConfig,
    consolidated_at: Mutex<HashMap<SessionKey, DateTime<Utc>>>,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig, long_term: Arc<dyn LongTermMemory>) -> Self {
        let short_term = ShortTermBuffer::new(
            config.short_term_max_tokens,
            config.short_term_max_entries,
            Duration::from_secs(config.short_term_ttl_secs),
        );
        let working = WorkingSet::new(
            config.working_max_tokens,
            config.working_max_documents,
            Duration::from_secs(config.working_ttl_secs),
        );
        Self {
            short_term,
            working,
            long_term,
            config,
            consolidated_at: Mutex::new(HashMap::new()),
        }
    }

    pub fn short_term(&self) -> &ShortTermBuffer {
        &self.short_term
    }

    pub fn working(&self) -> &WorkingSet {
        &self.working
    }

    pub fn compose_budget(&self) -> usize {
        self.config.compose_budget_tokens
    }

    // ── Composition ──────────────────────────────────────────────────────

    /// Produce the memory context for one execution under `budget` tokens,
    /// split 0.6/0.4 between the short-term and long-term tiers.
    ///
    /// Never fails; a degraded tier simply contributes nothing.
    pub async fn compose(&self, key: &SessionKey, input: &str, budget: usize) -> MemoryContext {
        let short_budget = (budget as f32 * SHORT_TERM_SHARE) as usize;
        let long_budget = (budget as f32 * LONG_TERM_SHARE) as usize;
        let mut ctx = MemoryContext::default();

        // Long-term first: bypassed entirely when the tier is empty.
        match self.long_term.count(&key.agent_id).await {
            Ok(0) => {}
            Ok(_) => match self
                .long_term
                .recall(&key.agent_id, input, LONG_TERM_RECALL_LIMIT)
                .await
            {
                Ok(entries) if !entries.is_empty() => {
                    let mut lines = Vec::new();
                    let mut used = 0usize;
                    for entry in &entries {
                        let line = format!("- {}", entry.content);
                        let line_tokens = estimate_tokens(&line) + 1;
                        if used + line_tokens > long_budget {
                            ctx.truncated = true;
                            break;
                        }
                        used += line_tokens;
                        lines.push(line);
                    }
                    if !lines.is_empty() {
                        ctx.long_term_text = Some(lines.join("\n"));
                        ctx.total_tokens += used;
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "long-term recall failed; skipping"),
            },
            Err(e) => tracing::warn!(error = %e, "long-term count failed; skipping"),
        }

        if let Some((text, tokens, truncated)) = self.short_term.transcript(key, short_budget) {
            ctx.short_term_text = Some(text);
            ctx.total_tokens += tokens;
            ctx.truncated |= truncated;
        }

        ctx
    }

    // ── Write-back ───────────────────────────────────────────────────────

    /// Append the `(user, assistant)` pair after a successful execution.
    pub fn write_back(&self, key: &SessionKey, input: &str, output: &str, metadata: Value) {
        self.short_term
            .append(key, MessageRole::User, input, Some(metadata.clone()));
        self.short_term
            .append(key, MessageRole::Assistant, output, Some(metadata));
    }

    /// Record retrieved document chunks into the session working set.
    pub fn record_context(&self, key: &SessionKey, chunks: &[RetrievedChunk]) {
        self.working.record_chunks(key, chunks);
    }

    // ── Consolidation ────────────────────────────────────────────────────

    /// Consolidate the oldest contiguous block of short-term turns into a
    /// single long-term summary, when the buffer is large enough and the
    /// consolidation interval has elapsed.
    pub async fn consolidate_if_due(&self, key: &SessionKey) -> Option<ConsolidationStats> {
        if self.short_term.total_tokens(key) <= self.config.summary_min_tokens {
            return None;
        }
        let interval = Duration::from_secs(self.config.consolidation_interval_secs);
        {
            let guard = self.consolidated_at.lock().ok()?;
            if let Some(last) = guard.get(key) {
                let since = Utc::now().signed_duration_since(*last);
                if since.to_std().map(|d| d < interval).unwrap_or(true) {
                    return None;
                }
            }
        }

        let len = self.short_term.len(key);
        if len < 2 {
            return None;
        }
        let drained = self.short_term.drain_oldest(key, len / 2);
        if drained.is_empty() {
            return None;
        }
        let freed: usize = drained.iter().map(|e| e.tokens).sum();

        // Extractive summary: role-prefixed lines of the drained block.
        let mut summary = drained
            .iter()
            .map(|e| {
                let label = match e.role {
                    MessageRole::User => "User",
                    MessageRole::Assistant => "Assistant",
                    MessageRole::System => "System",
                    MessageRole::Tool => "Tool",
                };
                format!("{label}: {}", e.content)
            })
            .collect::<Vec<_>>()
            .join("\n");
        if summary.len() > SUMMARY_MAX_CHARS {
            summary.truncate(SUMMARY_MAX_CHARS);
        }

        if let Err(e) = self
            .long_term
            .append(&key.agent_id, MemoryKind::Summary, &summary)
            .await
        {
            tracing::warn!(error = %e, "consolidation write failed; block evicted without summary");
            return None;
        }

        if let Ok(mut guard) = self.consolidated_at.lock() {
            guard.insert(key.clone(), Utc::now());
        }

        Some(ConsolidationStats {
            summaries_created: 1,
            tokens_saved: freed.saturating_sub(estimate_tokens(&summary)),
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::embeddings::HashEmbeddingProvider;
    use crate::memory::long_term::InMemoryLongTerm;
    use serde_json::json;

    fn key() -> SessionKey {
        SessionKey::new("t-1", "a-1", "s-1")
    }

    fn manager() -> MemoryManager {
        MemoryManager::new(
            MemoryConfig::default(),
            Arc::new(InMemoryLongTerm::new(Arc::new(HashEmbeddingProvider::new()))),
        )
    }

    #[tokio::test]
    async fn write_back_appends_exactly_two_entries() {
        let mgr = manager();
        mgr.write_back(&key(), "question", "answer", json!({"tokens": 60}));
        assert_eq!(mgr.short_term().len(&key()), 2);
        mgr.write_back(&key(), "again", "sure", json!({}));
        assert_eq!(mgr.short_term().len(&key()), 4);
    }

    #[tokio::test]
    async fn compose_empty_session_is_empty() {
        let mgr = manager();
        let ctx = mgr.compose(&key(), "anything", 4000).await;
        assert!(ctx.is_empty());
        assert_eq!(ctx.total_tokens, 0);
    }

    #[tokio::test]
    async fn compose_renders_transcript_and_bullets() {
        let mgr = manager();
        mgr.write_back(&key(), "what is the plan", "ship friday", json!({}));
        mgr.long_term
            .append("a-1", MemoryKind::Fact, "the user ships on fridays")
            .await
            .unwrap();

        let ctx = mgr.compose(&key(), "ship plan fridays", 4000).await;
        let short = ctx.short_term_text.unwrap();
        assert!(short.contains("User: what is the plan"));
        assert!(short.contains("Assistant: ship friday"));
        let long = ctx.long_term_text.unwrap();
        assert!(long.starts_with("- "));
        assert!(ctx.total_tokens > 0);
    }

    #[tokio::test]
    async fn compose_skips_long_term_when_tier_empty() {
        let mgr = manager();
        mgr.write_back(&key(), "hi", "hello", json!({}));
        let ctx = mgr.compose(&key(), "hi", 4000).await;
        assert!(ctx.long_term_text.is_none());
        assert!(ctx.short_term_text.is_some());
    }

    #[tokio::test]
    async fn compose_respects_budget_split() {
        let mgr = manager();
        // A short-term turn far larger than 60% of a tiny budget.
        mgr.write_back(&key(), &"x".repeat(2000), &"y".repeat(2000), json!({}));
        let ctx = mgr.compose(&key(), "x", 100).await;
        // Whatever was kept fits in the 60-token short-term share.
        assert!(ctx.total_tokens <= 60);
    }

    #[tokio::test]
    async fn consolidation_summarises_oldest_block() {
        let mut config = MemoryConfig::default();
        config.summary_min_tokens = 10;
        config.consolidation_interval_secs = 0;
        let long_term = Arc::new(InMemoryLongTerm::new(Arc::new(HashEmbeddingProvider::new())));
        let mgr = MemoryManager::new(config, long_term.clone());

        for i in 0..6 {
            mgr.write_back(
                &key(),
                &format!("question number {i} with some padding text"),
                &format!("answer number {i} with some padding text"),
                json!({}),
            );
        }
        let before = mgr.short_term().len(&key());
        let stats = mgr.consolidate_if_due(&key()).await.unwrap();
        assert_eq!(stats.summaries_created, 1);
        assert!(stats.tokens_saved > 0);
        assert!(mgr.short_term().len(&key()) < before);
        assert_eq!(long_term.count("a-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn consolidation_skipped_below_threshold() {
        let mgr = manager();
        mgr.write_back(&key(), "hi", "yo", json!({}));
        assert!(mgr.consolidate_if_due(&key()).await.is_none());
    }

    #[tokio::test]
    async fn consolidation_respects_interval() {
        let mut config = MemoryConfig::default();
        config.summary_min_tokens = 1;
        // Default 5-minute interval: a second pass right away must be skipped.
        let mgr = MemoryManager::new(
            config,
            Arc::new(InMemoryLongTerm::new(Arc::new(HashEmbeddingProvider::new()))),
        );
        for i in 0..8 {
            mgr.write_back(&key(), &format!("q{i} padding padding"), "a", json!({}));
        }
        assert!(mgr.consolidate_if_due(&key()).await.is_some());
        assert!(mgr.consolidate_if_due(&key()).await.is_none());
    }
}
