//! The durable execution record and its derived reliability aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::router::{ReliabilityTelemetry, TokenUsage};

/// Weight of average retry attempts in the derived reliability score.
pub const RETRY_SCORE_WEIGHT: f64 = 0.1;

/// Weight of the fallback rate in the derived reliability score.
pub const FALLBACK_SCORE_WEIGHT: f64 = 0.05;

// ─── ExecutionStatus ─────────────────────────────────────────────────────────

/// Record lifecycle: created `Running`, then exactly one terminal transition.
/// There are no transitions out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl From<&str> for ExecutionStatus {
    fn from(s: &str) -> Self {
        match s {
            "completed" => ExecutionStatus::Completed,
            "failed" => ExecutionStatus::Failed,
            "cancelled" => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Running,
        }
    }
}

// ─── ExecutionOutput ─────────────────────────────────────────────────────────

/// The model output captured on a completed record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub content: String,
    pub tokens: TokenUsage,
    pub cost_usd: f64,
    pub model: String,
    pub provider: String,
}

// ─── ExecutionRecord ─────────────────────────────────────────────────────────

/// One durable execution row, keyed by `execution_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub agent_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub session_id: Option<String>,
    pub status: ExecutionStatus,
    pub input_snapshot: String,
    pub output: Option<ExecutionOutput>,
    pub telemetry: ReliabilityTelemetry,
    pub estimated_cost_usd: f64,
    pub actual_cost_usd: f64,
    pub total_duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ExecutionRecord {
    /// A fresh `Running` record, created before the first LLM call.
    pub fn running(
        execution_id: impl Into<String>,
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
        session_id: Option<String>,
        input: impl Into<String>,
        estimated_cost_usd: f64,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            session_id,
            status: ExecutionStatus::Running,
            input_snapshot: input.into(),
            output: None,
            telemetry: ReliabilityTelemetry::default(),
            estimated_cost_usd,
            actual_cost_usd: 0.0,
            total_duration_ms: 0,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }
}

/// The atomic terminal update applied to a `Running` record.
#[derive(Debug, Clone)]
pub struct RecordCompletion {
    pub status: ExecutionStatus,
    pub output: Option<ExecutionOutput>,
    pub error_message: Option<String>,
    pub telemetry: ReliabilityTelemetry,
    pub actual_cost_usd: f64,
    pub total_duration_ms: u64,
}

// ─── Aggregates ──────────────────────────────────────────────────────────────

/// Aggregate reliability statistics over an agent's terminal records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: u64,
    pub completed: u64,
    pub success_rate: f64,
    pub avg_retry_attempts: f64,
    pub fallback_rate: f64,
    /// Derived score; not stored per-record.
    pub reliability_score: f64,
    pub retry_score_weight: f64,
    pub fallback_score_weight: f64,
}

/// `success_rate × (1 − 0.1·avg_retry_attempts − 0.05·fallback_rate)`,
/// floored at zero.
pub fn reliability_score(success_rate: f64, avg_retry_attempts: f64, fallback_rate: f64) -> f64 {
    (success_rate
        * (1.0 - RETRY_SCORE_WEIGHT * avg_retry_attempts - FALLBACK_SCORE_WEIGHT * fallback_rate))
        .max(0.0)
}
