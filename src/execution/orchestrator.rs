//! The per-request state machine:
//! `Init → Resolving → ContextBuilt → InvokingLLM → Recording → Terminal`.
//!
//! The orchestrator owns the request and its derived transient state for the
//! request's lifetime. Context assembly and memory composition run
//! concurrently and degrade to annotations on failure; only the LLM call
//! itself can fail the execution. The recorder holds the sole write
//! capability over the durable record.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use uuid::Uuid;

use crate::agent::{Agent, AgentStore};
use crate::context::{
    ContextAssembler, ContextStrategy, DocumentContextResult, assembler::ContextRequest,
};
use crate::error::{ErrorClass, ExecError, ExecResult};
use crate::mcp::McpClient;
use crate::memory::{MemoryContext, MemoryManager, SessionKey};
use crate::router::{CancelFlag, Message, ReliabilityTelemetry, ReliableRouter, RouterRequest, RouterResponse};
use crate::skills::{ToolCatalog, ToolResolver};

use super::record::{ExecutionOutput, ExecutionRecord, ExecutionStatus, RecordCompletion};
use super::recorder::ExecutionRecorder;
use super::tool_loop::{CallPolicy, ToolLoop, tool_hint};
use super::types::{
    ContextMetadata, ExecutionMetadata, ExecutionRequest, ExecutionResponse, HistoryMessage,
};

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct Orchestrator {
    agents: Arc<dyn AgentStore>,
    resolver: Arc<ToolResolver>,
    assembler: Arc<ContextAssembler>,
    memory: Arc<MemoryManager>,
    router: Arc<ReliableRouter>,
    mcp: Arc<dyn McpClient>,
    recorder: Arc<dyn ExecutionRecorder>,
    max_tool_iterations: usize,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agents: Arc<dyn AgentStore>,
        resolver: Arc<ToolResolver>,
        assembler: Arc<ContextAssembler>,
        memory: Arc<MemoryManager>,
        router: Arc<ReliableRouter>,
        mcp: Arc<dyn McpClient>,
        recorder: Arc<dyn ExecutionRecorder>,
        max_tool_iterations: usize,
    ) -> Self {
        Self {
            agents,
            resolver,
            assembler,
            memory,
            router,
            mcp,
            recorder,
            max_tool_iterations,
        }
    }

    /// Execute a request to a terminal state.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecResult<ExecutionResponse> {
        self.execute_cancellable(request, None).await
    }

    /// Execute with a cancellation flag; cancellation aborts in-flight
    /// downstream calls and writes a terminal record.
    #[tracing::instrument(
        name = "execution",
        skip_all,
        fields(agent = %request.agent_id, tenant = %request.tenant_id)
    )]
    pub async fn execute_cancellable(
        &self,
        request: ExecutionRequest,
        cancel: Option<CancelFlag>,
    ) -> ExecResult<ExecutionResponse> {
        let started = Instant::now();

        // ── Init ──────────────────────────────────────────────────────────
        if request.input.trim().is_empty() {
            return Err(ExecError::Validation("input must not be empty".to_string()));
        }
        if request.user_id.is_empty() && request.tenant_id.is_empty() {
            return Err(ExecError::Unauthorized("missing identity".to_string()));
        }

        let agent = self
            .agents
            .get(&request.agent_id)
            .await?
            .ok_or_else(|| ExecError::NotFound(format!("agent '{}'", request.agent_id)))?;
        agent.validate()?;
        if !agent.allows_access(&request.user_id, &request.tenant_id) {
            // Access failure reads as absence: agent existence is not leaked
            // across tenants.
            return Err(ExecError::NotFound(format!("agent '{}'", request.agent_id)));
        }

        let execution_id = Uuid::new_v4().to_string();
        let conversation_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let policy = CallPolicy::for_agent(&agent, self.router.catalog());

        // Tracking is best-effort and never blocks the execution.
        let record = ExecutionRecord::running(
            execution_id.clone(),
            agent.id.clone(),
            request.user_id.clone(),
            request.tenant_id.clone(),
            request.session_id.clone(),
            request.input.clone(),
            policy.estimated_cost,
        );
        if let Err(e) = self.recorder.create(&record).await {
            tracing::warn!(error = %e, "execution record create failed; continuing untracked");
        }

        // ── Resolving (concurrent) ────────────────────────────────────────
        let session_key = request
            .session_id
            .as_ref()
            .filter(|_| agent.enable_memory)
            .map(|sid| SessionKey::new(&request.tenant_id, &agent.id, sid));

        let context_request = ContextRequest {
            input: request.input.clone(),
            tenant_id: request.tenant_id.clone(),
            auth_token: request.auth_token.clone(),
            notebook_ids_override: request.notebook_ids_override.clone(),
            selected_documents: request.selected_documents.clone(),
            disable_knowledge: request.disable_knowledge,
        };
        let selected_strategy = ContextAssembler::select_strategy(&agent, &context_request);

        let (tools_res, context_res, memory_ctx) = tokio::join!(
            self.resolve_tools(&agent),
            self.assembler.assemble(&agent, &context_request),
            self.compose_memory(&agent, &session_key, &request.input),
        );

        let mut annotations: Vec<String> = Vec::new();

        let catalog = match tools_res {
            Ok((catalog, notes)) => {
                annotations.extend(notes);
                catalog
            }
            // Missing skills invalidate the agent record itself.
            Err(e) if e.class() == ErrorClass::NotFound => {
                self.finish_failed(&execution_id, &e, ReliabilityTelemetry::default(), started)
                    .await;
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(error = %e, "tool resolution degraded");
                annotations.push(format!("tool resolution failed: {}", e.class()));
                ToolCatalog::default()
            }
        };

        let context = match context_res {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "context assembly degraded");
                annotations.push(format!("context retrieval failed: {}", e.class()));
                DocumentContextResult::empty(selected_strategy)
            }
        };
        annotations.extend(context.notes.clone());

        // ── ContextBuilt ──────────────────────────────────────────────────
        let hint = (!catalog.is_empty()).then(|| tool_hint(&catalog));
        let messages = compose_messages(
            &agent,
            &context.text,
            hint.as_deref(),
            memory_ctx.as_ref(),
            &request.history,
            &request.input,
        );

        let base_request = {
            let r = RouterRequest::new(agent.model_preference.clone(), messages)
                .with_temperature(agent.temperature)
                .with_max_tokens(agent.max_tokens)
                .with_top_p(agent.top_p)
                .with_optimize_for(agent.optimize_for)
                .with_user(request.user_id.clone());
            match &agent.provider_preference {
                Some(p) => r.with_provider(p.clone()),
                None => r,
            }
        };

        // ── InvokingLLM ───────────────────────────────────────────────────
        let llm_result = if catalog.is_empty() {
            self.router
                .call_with_policy(
                    &base_request,
                    &policy.retry,
                    &policy.fallback,
                    &policy.required_features,
                    policy.estimated_cost,
                    cancel.as_ref(),
                )
                .await
                .map(|outcome| (outcome.response, outcome.telemetry, false))
        } else {
            let loop_ = ToolLoop::new(
                self.router.clone(),
                self.mcp.clone(),
                self.max_tool_iterations,
            );
            loop_
                .run(base_request, &catalog, &policy, cancel.as_ref())
                .await
                .map(|outcome| (outcome.response, outcome.telemetry, outcome.tools_used))
        };

        // ── Recording → Terminal ──────────────────────────────────────────
        let (response, telemetry, tools_used) = match llm_result {
            Ok(r) => r,
            Err(failure) => {
                // The record keeps the telemetry accumulated before the
                // failure: real retries and fallover must not read as zero.
                self.finish_failed(&execution_id, &failure.error, failure.telemetry, started)
                    .await;
                return Err(failure.error);
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let completion = RecordCompletion {
            status: ExecutionStatus::Completed,
            output: Some(ExecutionOutput {
                content: response.content.clone(),
                tokens: response.usage,
                cost_usd: response.cost_usd,
                model: response.model_used.clone(),
                provider: response.provider_used.clone(),
            }),
            error_message: None,
            telemetry: telemetry.clone(),
            actual_cost_usd: response.cost_usd,
            total_duration_ms: duration_ms,
        };
        if let Err(e) = self.recorder.finish(&execution_id, &completion).await {
            tracing::warn!(error = %e, "execution record finish failed");
        }

        // Memory write-back after the terminal transition; never blocks the
        // response on failure.
        if let Some(key) = &session_key {
            self.memory.write_back(
                key,
                &request.input,
                &response.content,
                json!({
                    "tokens": response.usage.total(),
                    "cost_usd": response.cost_usd,
                    "provider": response.provider_used,
                    "model": response.model_used,
                }),
            );
            self.memory.record_context(key, &context.chunks);
            if let Some(stats) = self.memory.consolidate_if_due(key).await {
                tracing::debug!(
                    summaries = stats.summaries_created,
                    tokens_saved = stats.tokens_saved,
                    "short-term block consolidated"
                );
            }
        }

        Ok(build_response(
            execution_id,
            conversation_id,
            response,
            telemetry,
            tools_used,
            duration_ms,
            context_metadata(
                selected_strategy,
                &context,
                memory_ctx.as_ref(),
                annotations,
            ),
        ))
    }

    async fn resolve_tools(&self, agent: &Agent) -> ExecResult<(ToolCatalog, Vec<String>)> {
        if !agent.has_skills() {
            return Ok((ToolCatalog::default(), Vec::new()));
        }
        self.resolver.resolve(agent).await
    }

    async fn compose_memory(
        &self,
        agent: &Agent,
        session_key: &Option<SessionKey>,
        input: &str,
    ) -> Option<MemoryContext> {
        let key = session_key.as_ref()?;
        if !agent.enable_memory {
            return None;
        }
        Some(
            self.memory
                .compose(key, input, self.memory.compose_budget())
                .await,
        )
    }

    async fn finish_failed(
        &self,
        execution_id: &str,
        error: &ExecError,
        telemetry: ReliabilityTelemetry,
        started: Instant,
    ) {
        let message = if matches!(error, ExecError::Cancelled) {
            "cancelled".to_string()
        } else {
            error.public_message()
        };
        let completion = RecordCompletion {
            status: ExecutionStatus::Failed,
            output: None,
            error_message: Some(message),
            telemetry,
            actual_cost_usd: 0.0,
            total_duration_ms: started.elapsed().as_millis() as u64,
        };
        if let Err(e) = self.recorder.finish(execution_id, &completion).await {
            tracing::warn!(error = %e, "failed-record finish failed");
        }
    }
}

// ─── Message composition ─────────────────────────────────────────────────────

/// Compose the message list in the contract order: one system message (base
/// prompt + injected context + tool hint), then long-term memory, then the
/// short-term transcript, then history (when memory did not already cover
/// it), then the current user input.
fn compose_messages(
    agent: &Agent,
    context_text: &str,
    tool_hint: Option<&str>,
    memory: Option<&MemoryContext>,
    history: &[HistoryMessage],
    input: &str,
) -> Vec<Message> {
    let mut system_text = agent.system_prompt.clone();
    if !context_text.is_empty() {
        system_text.push_str("\n\n");
        system_text.push_str(context_text);
    }
    if let Some(hint) = tool_hint {
        system_text.push_str(hint);
    }

    let mut messages = vec![Message::system(system_text)];

    let mut memory_covered_history = false;
    if let Some(mem) = memory {
        if let Some(lt) = &mem.long_term_text {
            messages.push(Message::system(format!("Relevant long-term memory:\n{lt}")));
        }
        if let Some(st) = &mem.short_term_text {
            messages.push(Message::system(format!("Recent conversation:\n{st}")));
            memory_covered_history = true;
        }
    }

    if !memory_covered_history {
        for h in history {
            messages.push(Message {
                role: h.role,
                content: h.content.clone(),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
    }

    messages.push(Message::user(input));
    messages
}

fn context_metadata(
    strategy: ContextStrategy,
    context: &DocumentContextResult,
    memory: Option<&MemoryContext>,
    annotations: Vec<String>,
) -> ContextMetadata {
    ContextMetadata {
        strategy: context.strategy.clone(),
        knowledge_enabled: strategy != ContextStrategy::None,
        context_empty: context.is_empty(),
        chunk_count: context.chunks.len(),
        context_tokens: context.total_tokens,
        truncated: context.truncated,
        memory_tokens: memory.map(|m| m.total_tokens).unwrap_or(0),
        memory_truncated: memory.map(|m| m.truncated).unwrap_or(false),
        annotations,
    }
}

fn build_response(
    execution_id: String,
    conversation_id: String,
    response: RouterResponse,
    telemetry: ReliabilityTelemetry,
    tools_used: bool,
    duration_ms: u64,
    context_metadata: ContextMetadata,
) -> ExecutionResponse {
    let routing_strategy = if telemetry.routing_reason.is_empty() {
        response.routing_reason.clone()
    } else {
        telemetry.routing_reason.clone()
    };
    ExecutionResponse {
        execution_id,
        conversation_id,
        output: response.content,
        tokens_used: response.usage.total(),
        cost_usd: response.cost_usd,
        metadata: ExecutionMetadata {
            model: response.model_used,
            provider: response.provider_used,
            routing_strategy,
            response_time_ms: duration_ms,
            context_metadata,
            mcp_tools_used: tools_used,
        },
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
