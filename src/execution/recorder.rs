//! Durable execution tracking.
//!
//! The recorder holds the sole write capability over execution records.
//! Tracking is best-effort: a failed create never blocks the execution, and
//! the terminal update is guarded so a terminal record can never transition
//! again.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{ExecError, ExecResult};
use crate::router::{ReliabilityTelemetry, TokenUsage};

use super::record::{
    ExecutionOutput, ExecutionRecord, ExecutionStats, ExecutionStatus, FALLBACK_SCORE_WEIGHT,
    RETRY_SCORE_WEIGHT, RecordCompletion, reliability_score,
};

// ─── ExecutionRecorder seam ──────────────────────────────────────────────────

/// Write/read access to durable execution records.
#[async_trait]
pub trait ExecutionRecorder: Send + Sync {
    /// Insert a fresh `Running` record.
    async fn create(&self, record: &ExecutionRecord) -> ExecResult<()>;

    /// Apply the terminal update. Returns `false` when no `Running` record
    /// with this id exists (already terminal, or create never succeeded).
    async fn finish(&self, execution_id: &str, completion: &RecordCompletion) -> ExecResult<bool>;

    async fn get(&self, execution_id: &str) -> ExecResult<Option<ExecutionRecord>>;

    /// Aggregate reliability statistics over an agent's terminal records.
    async fn stats(&self, agent_id: &str) -> ExecResult<ExecutionStats>;
}

// ─── SqliteRecorder ──────────────────────────────────────────────────────────

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS executions (
    execution_id        TEXT PRIMARY KEY,
    agent_id            TEXT NOT NULL,
    user_id             TEXT NOT NULL,
    tenant_id           TEXT NOT NULL,
    session_id          TEXT,
    status              TEXT NOT NULL,
    input_snapshot      TEXT NOT NULL,
    output_content      TEXT,
    prompt_tokens       INTEGER,
    completion_tokens   INTEGER,
    output_model        TEXT,
    output_provider     TEXT,
    retry_attempts      INTEGER NOT NULL DEFAULT 0,
    fallback_used       INTEGER NOT NULL DEFAULT 0,
    failed_providers    TEXT NOT NULL DEFAULT '[]',
    total_retry_time_ms INTEGER NOT NULL DEFAULT 0,
    provider_latency_ms INTEGER NOT NULL DEFAULT 0,
    routing_reason      TEXT NOT NULL DEFAULT '',
    estimated_cost_usd  REAL NOT NULL DEFAULT 0,
    actual_cost_usd     REAL NOT NULL DEFAULT 0,
    total_duration_ms   INTEGER NOT NULL DEFAULT 0,
    started_at          TEXT NOT NULL,
    completed_at        TEXT,
    error_message       TEXT
);
CREATE INDEX IF NOT EXISTS idx_executions_agent ON executions(agent_id);
CREATE INDEX IF NOT EXISTS idx_executions_session ON executions(session_id);
";

/// SQLite-backed recorder. Statements are single-row, so the connection sits
/// behind a plain mutex.
pub struct SqliteRecorder {
    conn: Mutex<Connection>,
}

impl SqliteRecorder {
    pub fn open(path: impl AsRef<Path>) -> ExecResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| ExecError::Internal(format!("failed to open execution db: {e}")))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> ExecResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ExecError::Internal(format!("failed to open execution db: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> ExecResult<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| ExecError::Internal(format!("failed to apply execution schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> ExecResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ExecError::Internal(format!("recorder lock poisoned: {e}")))
    }

    /// The most recently started record for an agent.
    pub fn latest_for_agent(&self, agent_id: &str) -> ExecResult<Option<ExecutionRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM executions WHERE agent_id = ?1
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
            params![agent_id],
            row_to_record,
        )
        .optional()
        .map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> ExecError {
    ExecError::Internal(format!("execution db error: {e}"))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let status: String = row.get("status")?;
    let failed_providers: String = row.get("failed_providers")?;
    let output_content: Option<String> = row.get("output_content")?;
    let actual_cost_usd: f64 = row.get("actual_cost_usd")?;

    let output = output_content.map(|content| ExecutionOutput {
        content,
        tokens: TokenUsage {
            prompt_tokens: row.get::<_, Option<u32>>("prompt_tokens").unwrap_or(None).unwrap_or(0),
            completion_tokens: row
                .get::<_, Option<u32>>("completion_tokens")
                .unwrap_or(None)
                .unwrap_or(0),
        },
        cost_usd: actual_cost_usd,
        model: row.get::<_, Option<String>>("output_model").unwrap_or(None).unwrap_or_default(),
        provider: row
            .get::<_, Option<String>>("output_provider")
            .unwrap_or(None)
            .unwrap_or_default(),
    });

    let started_at: String = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;

    Ok(ExecutionRecord {
        execution_id: row.get("execution_id")?,
        agent_id: row.get("agent_id")?,
        user_id: row.get("user_id")?,
        tenant_id: row.get("tenant_id")?,
        session_id: row.get("session_id")?,
        status: ExecutionStatus::from(status.as_str()),
        input_snapshot: row.get("input_snapshot")?,
        output,
        telemetry: ReliabilityTelemetry {
            retry_attempts: row.get("retry_attempts")?,
            fallback_used: row.get::<_, i64>("fallback_used")? != 0,
            failed_providers: serde_json::from_str(&failed_providers).unwrap_or_default(),
            total_retry_time_ms: row.get("total_retry_time_ms")?,
            provider_latency_ms: row.get("provider_latency_ms")?,
            routing_reason: row.get("routing_reason")?,
        },
        estimated_cost_usd: row.get("estimated_cost_usd")?,
        actual_cost_usd,
        total_duration_ms: row.get("total_duration_ms")?,
        started_at: parse_ts(&started_at),
        completed_at: completed_at.as_deref().map(parse_ts),
        error_message: row.get("error_message")?,
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl ExecutionRecorder for SqliteRecorder {
    async fn create(&self, record: &ExecutionRecord) -> ExecResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO executions (
                execution_id, agent_id, user_id, tenant_id, session_id, status,
                input_snapshot, estimated_cost_usd, started_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.execution_id,
                record.agent_id,
                record.user_id,
                record.tenant_id,
                record.session_id,
                record.status.as_str(),
                record.input_snapshot,
                record.estimated_cost_usd,
                record.started_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn finish(&self, execution_id: &str, completion: &RecordCompletion) -> ExecResult<bool> {
        let failed_providers = serde_json::to_string(&completion.telemetry.failed_providers)
            .unwrap_or_else(|_| "[]".to_string());
        let (content, prompt_tokens, completion_tokens, model, provider) = match &completion.output
        {
            Some(o) => (
                Some(o.content.clone()),
                Some(o.tokens.prompt_tokens),
                Some(o.tokens.completion_tokens),
                Some(o.model.clone()),
                Some(o.provider.clone()),
            ),
            None => (None, None, None, None, None),
        };

        let conn = self.lock()?;
        // Guard: only a Running record may transition.
        let updated = conn
            .execute(
                "UPDATE executions SET
                    status = ?2,
                    output_content = ?3,
                    prompt_tokens = ?4,
                    completion_tokens = ?5,
                    output_model = ?6,
                    output_provider = ?7,
                    retry_attempts = ?8,
                    fallback_used = ?9,
                    failed_providers = ?10,
                    total_retry_time_ms = ?11,
                    provider_latency_ms = ?12,
                    routing_reason = ?13,
                    actual_cost_usd = ?14,
                    total_duration_ms = ?15,
                    completed_at = ?16,
                    error_message = ?17
                 WHERE execution_id = ?1 AND status = 'running'",
                params![
                    execution_id,
                    completion.status.as_str(),
                    content,
                    prompt_tokens,
                    completion_tokens,
                    model,
                    provider,
                    completion.telemetry.retry_attempts,
                    completion.telemetry.fallback_used as i64,
                    failed_providers,
                    completion.telemetry.total_retry_time_ms,
                    completion.telemetry.provider_latency_ms,
                    completion.telemetry.routing_reason,
                    completion.actual_cost_usd,
                    completion.total_duration_ms,
                    Utc::now().to_rfc3339(),
                    completion.error_message,
                ],
            )
            .map_err(db_err)?;
        Ok(updated > 0)
    }

    async fn get(&self, execution_id: &str) -> ExecResult<Option<ExecutionRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM executions WHERE execution_id = ?1",
            params![execution_id],
            row_to_record,
        )
        .optional()
        .map_err(db_err)
    }

    async fn stats(&self, agent_id: &str) -> ExecResult<ExecutionStats> {
        let conn = self.lock()?;
        let (total, completed, avg_retry, fallback_rate): (u64, u64, f64, f64) = conn
            .query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(AVG(retry_attempts), 0.0),
                    COALESCE(AVG(fallback_used), 0.0)
                 FROM executions
                 WHERE agent_id = ?1 AND status != 'running'",
                params![agent_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map_err(db_err)?;

        let success_rate = if total > 0 {
            completed as f64 / total as f64
        } else {
            0.0
        };
        Ok(ExecutionStats {
            total,
            completed,
            success_rate,
            avg_retry_attempts: avg_retry,
            fallback_rate,
            reliability_score: reliability_score(success_rate, avg_retry, fallback_rate),
            retry_score_weight: RETRY_SCORE_WEIGHT,
            fallback_score_weight: FALLBACK_SCORE_WEIGHT,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
