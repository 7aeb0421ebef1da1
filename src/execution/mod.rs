//! The execution core: request/response types, the durable record, the tool
//! loop, and the per-request orchestrator.

pub mod orchestrator;
pub mod record;
pub mod recorder;
pub mod tool_loop;
pub mod types;

pub use orchestrator::Orchestrator;
pub use record::{
    ExecutionOutput, ExecutionRecord, ExecutionStats, ExecutionStatus, FALLBACK_SCORE_WEIGHT,
    RETRY_SCORE_WEIGHT, RecordCompletion, reliability_score,
};
pub use recorder::{ExecutionRecorder, SqliteRecorder};
pub use tool_loop::{CallPolicy, LoopOutcome, McpContextRetriever, ToolInvocationRecord, ToolLoop};
pub use types::{
    ContextMetadata, ExecutionMetadata, ExecutionRequest, ExecutionResponse, HistoryMessage,
};
