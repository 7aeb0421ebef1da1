//! Short-term tier: a per-session conversation buffer.
//!
//! Buffers are partitioned by `(tenant_id, agent_id, session_id)`. Within a
//! partition, reads and writes are serialised by the lock; across partitions
//! operations are independent. Append-only with oldest-first eviction once
//! the token or entry ceiling is exceeded; idle partitions expire after the
//! TTL.

use std::{
    collections::{HashMap, VecDeque},
    sync::RwLock,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::context::estimate_tokens;
use crate::router::MessageRole;

// ─── SessionKey ──────────────────────────────────────────────────────────────

/// Partition key for the session-scoped memory tiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub tenant_id: String,
    pub agent_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            session_id: session_id.into(),
        }
    }
}

// ─── ShortTermEntry ──────────────────────────────────────────────────────────

/// One buffered conversation turn.
#[derive(Debug, Clone)]
pub struct ShortTermEntry {
    pub role: MessageRole,
    pub content: String,
    pub tokens: usize,
    /// Execution metadata: tokens, cost, provider, model.
    pub metadata: Option<Value>,
    pub at: DateTime<Utc>,
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "System",
        MessageRole::User => "User",
        MessageRole::Assistant => "Assistant",
        MessageRole::Tool => "Tool",
    }
}

struct Partition {
    entries: VecDeque<ShortTermEntry>,
    tokens: usize,
    last_active: DateTime<Utc>,
}

impl Partition {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            tokens: 0,
            last_active: Utc::now(),
        }
    }
}

// ─── ShortTermBuffer ─────────────────────────────────────────────────────────

/// Partitioned short-term conversation buffer.
pub struct ShortTermBuffer {
    partitions: RwLock<HashMap<SessionKey, Partition>>,
    max_tokens: usize,
    max_entries: usize,
    ttl: Duration,
}

impl ShortTermBuffer {
    pub fn new(max_tokens: usize, max_entries: usize, ttl: Duration) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            max_tokens,
            max_entries,
            ttl,
        }
    }

    fn expired(&self, p: &Partition) -> bool {
        let idle = Utc::now().signed_duration_since(p.last_active);
        idle.to_std().map(|d| d > self.ttl).unwrap_or(false)
    }

    /// Append a turn, evicting oldest entries past the ceilings.
    pub fn append(
        &self,
        key: &SessionKey,
        role: MessageRole,
        content: impl Into<String>,
        metadata: Option<Value>,
    ) {
        let content = content.into();
        let entry = ShortTermEntry {
            role,
            tokens: estimate_tokens(&content),
            content,
            metadata,
            at: Utc::now(),
        };

        let Ok(mut guard) = self.partitions.write() else {
            return;
        };
        let partition = guard.entry(key.clone()).or_insert_with(Partition::new);
        if self.expired(partition) {
            partition.entries.clear();
            partition.tokens = 0;
        }
        partition.tokens += entry.tokens;
        partition.entries.push_back(entry);
        partition.last_active = Utc::now();

        while partition.entries.len() > self.max_entries || partition.tokens > self.max_tokens {
            let Some(evicted) = partition.entries.pop_front() else {
                break;
            };
            partition.tokens = partition.tokens.saturating_sub(evicted.tokens);
        }
    }

    /// Number of buffered turns.
    pub fn len(&self, key: &SessionKey) -> usize {
        self.partitions
            .read()
            .ok()
            .and_then(|g| {
                g.get(key)
                    .filter(|p| !self.expired(p))
                    .map(|p| p.entries.len())
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self, key: &SessionKey) -> bool {
        self.len(key) == 0
    }

    /// Total buffered tokens.
    pub fn total_tokens(&self, key: &SessionKey) -> usize {
        self.partitions
            .read()
            .ok()
            .and_then(|g| {
                g.get(key)
                    .filter(|p| !self.expired(p))
                    .map(|p| p.tokens)
            })
            .unwrap_or(0)
    }

    /// Render a labelled transcript of the most recent turns that fit
    /// `budget` tokens, in chronological order. Returns the text, its token
    /// estimate, and whether older turns were cut.
    pub fn transcript(&self, key: &SessionKey, budget: usize) -> Option<(String, usize, bool)> {
        let guard = self.partitions.read().ok()?;
        let partition = guard.get(key).filter(|p| !self.expired(p))?;
        if partition.entries.is_empty() {
            return None;
        }

        // Walk newest → oldest, keeping what fits, then restore order.
        let mut kept: Vec<&ShortTermEntry> = Vec::new();
        let mut used = 0usize;
        let mut truncated = false;
        for entry in partition.entries.iter().rev() {
            let line_tokens = entry.tokens + 2;
            if used + line_tokens > budget {
                truncated = true;
                break;
            }
            used += line_tokens;
            kept.push(entry);
        }
        if kept.is_empty() {
            return None;
        }
        kept.reverse();

        let text = kept
            .iter()
            .map(|e| format!("{}: {}", role_label(e.role), e.content))
            .collect::<Vec<_>>()
            .join("\n");
        Some((text, used, truncated))
    }

    /// Remove and return the oldest `count` turns (for consolidation).
    pub fn drain_oldest(&self, key: &SessionKey, count: usize) -> Vec<ShortTermEntry> {
        let Ok(mut guard) = self.partitions.write() else {
            return Vec::new();
        };
        let Some(partition) = guard.get_mut(key) else {
            return Vec::new();
        };
        let take = count.min(partition.entries.len());
        let drained: Vec<ShortTermEntry> = partition.entries.drain(..take).collect();
        let freed: usize = drained.iter().map(|e| e.tokens).sum();
        partition.tokens = partition.tokens.saturating_sub(freed);
        drained
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
