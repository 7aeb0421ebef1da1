//! The tool loop: fixed-point iteration between the LLM and MCP tools.
//!
//! ```text
//! messages + tools (tool_choice=required)
//!       │
//!       ▼
//! ReliableRouter.call ──► no tool calls? ──► final response
//!       │
//!       ▼ tool calls present
//! invoke each call in parallel (120 s cap each)
//!   append results in tool_call_id order
//!       │
//!       ▼
//! iteration += 1; if < max_iterations → repeat (tool_choice=auto)
//!       │
//!       ▼
//! cap reached → surface the last assistant turn
//! ```
//!
//! A failing tool call never aborts the loop; its error is embedded as the
//! tool message content so the model can react.

use std::sync::Arc;
use std::sync::atomic::Ordering as AtomicOrdering;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use uuid::Uuid;

use crate::agent::Agent;
use crate::context::{ChunkSource, McpContextSource, RetrievedChunk, estimate_tokens};
use crate::error::{ExecError, ExecResult};
use crate::mcp::McpClient;
use crate::router::{
    CancelFlag, FallbackConfig, Message, PolicyFailure, ProviderCatalog, ReliabilityTelemetry,
    ReliableRouter, RetryConfig, RouterRequest, RouterResponse, ToolCall, ToolChoice,
};
use crate::skills::{ToolCatalog, ToolResolver};

// ─── CallPolicy ──────────────────────────────────────────────────────────────

/// The reliability policy and fallback guards in effect for one execution's
/// LLM calls.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub retry: RetryConfig,
    pub fallback: FallbackConfig,
    pub required_features: Vec<String>,
    pub estimated_cost: f64,
}

impl CallPolicy {
    pub fn for_agent(agent: &Agent, catalog: &ProviderCatalog) -> Self {
        let estimated_cost = agent
            .provider_preference
            .as_deref()
            .and_then(|p| catalog.est_cost(p))
            .unwrap_or(0.0);
        Self {
            retry: agent.effective_retry(),
            fallback: agent.effective_fallback(),
            required_features: agent.required_features.clone(),
            estimated_cost,
        }
    }
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// One tool invocation's textual result.
#[derive(Debug, Clone)]
pub struct ToolInvocationRecord {
    pub name: String,
    pub text: String,
    pub ok: bool,
}

/// Result of running the loop to completion.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub response: RouterResponse,
    pub telemetry: ReliabilityTelemetry,
    pub tools_used: bool,
    pub iterations: usize,
    pub tool_results: Vec<ToolInvocationRecord>,
}

// ─── Tool hint ───────────────────────────────────────────────────────────────

/// Suffix appended to the existing system message when tools are available.
pub fn tool_hint(catalog: &ToolCatalog) -> String {
    format!(
        "\n\nYou have access to the following tools: {}. \
         Invoke a tool whenever its capability matches the request.",
        catalog.tool_names().join(", ")
    )
}

// ─── ToolLoop ────────────────────────────────────────────────────────────────

/// Drives LLM ↔ tool-call rounds until the model answers in text or the
/// iteration cap is hit.
pub struct ToolLoop {
    router: Arc<ReliableRouter>,
    mcp: Arc<dyn McpClient>,
    max_iterations: usize,
}

impl ToolLoop {
    pub fn new(router: Arc<ReliableRouter>, mcp: Arc<dyn McpClient>, max_iterations: usize) -> Self {
        Self {
            router,
            mcp,
            max_iterations,
        }
    }

    /// Run the loop. `request.messages` must already carry the composed
    /// conversation; tools and tool_choice are managed here. A failure
    /// carries the telemetry merged across every step taken so far.
    #[tracing::instrument(skip_all, fields(max_iterations = self.max_iterations, tools = catalog.tools.len()))]
    pub async fn run(
        &self,
        mut request: RouterRequest,
        catalog: &ToolCatalog,
        policy: &CallPolicy,
        cancel: Option<&CancelFlag>,
    ) -> Result<LoopOutcome, PolicyFailure> {
        request.tools = catalog.tools.clone();

        // Cap of zero degenerates to a single call with tool_choice=auto.
        if self.max_iterations == 0 {
            request.tool_choice = Some(ToolChoice::Auto);
            let outcome = self.call(&request, policy, cancel).await?;
            return Ok(LoopOutcome {
                response: outcome.0,
                telemetry: outcome.1,
                tools_used: false,
                iterations: 0,
                tool_results: Vec::new(),
            });
        }

        // The first step forces a tool invocation; later steps are free.
        request.tool_choice = Some(ToolChoice::Required);

        let mut telemetry = ReliabilityTelemetry::default();
        let mut tool_results: Vec<ToolInvocationRecord> = Vec::new();
        let mut tools_used = false;
        let mut last_response: Option<RouterResponse> = None;

        for iteration in 1..=self.max_iterations {
            let (response, step_telemetry) = match self.call(&request, policy, cancel).await {
                Ok(step) => step,
                Err(mut failure) => {
                    // Earlier successful steps still count.
                    telemetry.merge(&failure.telemetry);
                    failure.telemetry = telemetry;
                    return Err(failure);
                }
            };
            telemetry.merge(&step_telemetry);

            request.messages.push(Message::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            if response.tool_calls.is_empty() {
                return Ok(LoopOutcome {
                    response,
                    telemetry,
                    tools_used,
                    iterations: iteration,
                    tool_results,
                });
            }

            if let Some(flag) = cancel
                && flag.load(AtomicOrdering::SeqCst)
            {
                return Err(PolicyFailure::new(ExecError::Cancelled, telemetry));
            }

            // Invoke the batch in parallel; results are delivered back to
            // the model in the order of the assistant's tool_calls array.
            let batch = join_all(
                response
                    .tool_calls
                    .iter()
                    .map(|tc| self.invoke(tc, catalog)),
            )
            .await;

            for (tc, record) in response.tool_calls.iter().zip(batch) {
                request
                    .messages
                    .push(Message::tool(record.text.clone(), tc.id.clone()));
                tools_used = true;
                tool_results.push(record);
            }

            last_response = Some(response);
            request.tool_choice = Some(ToolChoice::Auto);
        }

        // Cap exhausted — surface the last assistant turn.
        tracing::warn!(cap = self.max_iterations, "tool loop reached iteration cap");
        let Some(response) = last_response else {
            return Err(PolicyFailure::new(
                ExecError::Internal("tool loop made no calls".to_string()),
                telemetry,
            ));
        };
        Ok(LoopOutcome {
            response,
            telemetry,
            tools_used,
            iterations: self.max_iterations,
            tool_results,
        })
    }

    async fn call(
        &self,
        request: &RouterRequest,
        policy: &CallPolicy,
        cancel: Option<&CancelFlag>,
    ) -> Result<(RouterResponse, ReliabilityTelemetry), PolicyFailure> {
        let outcome = self
            .router
            .call_with_policy(
                request,
                &policy.retry,
                &policy.fallback,
                &policy.required_features,
                policy.estimated_cost,
                cancel,
            )
            .await?;
        Ok((outcome.response, outcome.telemetry))
    }

    /// Invoke one tool call, folding every failure into a fault string.
    #[tracing::instrument(skip_all, fields(tool = %tc.name, call_id = %tc.id))]
    async fn invoke(&self, tc: &ToolCall, catalog: &ToolCatalog) -> ToolInvocationRecord {
        let Some(server) = catalog.route_for(&tc.name) else {
            return ToolInvocationRecord {
                name: tc.name.clone(),
                text: format!("[tool error] no server registered for tool '{}'", tc.name),
                ok: false,
            };
        };

        let arguments = match serde_json::from_str::<Value>(&tc.arguments) {
            Ok(v) => v,
            Err(e) => {
                return ToolInvocationRecord {
                    name: tc.name.clone(),
                    text: format!("[tool error] arguments are not valid JSON: {e}"),
                    ok: false,
                };
            }
        };

        match self.mcp.call_tool(server, &tc.name, arguments).await {
            Ok(outcome) if outcome.is_error => ToolInvocationRecord {
                name: tc.name.clone(),
                text: format!("[tool error] {}", outcome.text),
                ok: false,
            },
            Ok(outcome) => ToolInvocationRecord {
                name: tc.name.clone(),
                text: outcome.text,
                ok: true,
            },
            Err(e) => ToolInvocationRecord {
                name: tc.name.clone(),
                text: format!("[tool error] {e}"),
                ok: false,
            },
        }
    }
}

// ─── McpContextRetriever ─────────────────────────────────────────────────────

const RETRIEVAL_PROMPT: &str = "You are a retrieval assistant. Use the available \
tools to fetch documents relevant to the user's request, then stop.";

/// Autonomous context retrieval for the `mcp` context strategy: a bounded
/// tool-loop run whose tool outputs become context chunks.
pub struct McpContextRetriever {
    router: Arc<ReliableRouter>,
    mcp: Arc<dyn McpClient>,
    resolver: Arc<ToolResolver>,
}

impl McpContextRetriever {
    pub fn new(
        router: Arc<ReliableRouter>,
        mcp: Arc<dyn McpClient>,
        resolver: Arc<ToolResolver>,
    ) -> Self {
        Self {
            router,
            mcp,
            resolver,
        }
    }
}

#[async_trait]
impl McpContextSource for McpContextRetriever {
    async fn retrieve(
        &self,
        agent: &Agent,
        input: &str,
        max_steps: usize,
    ) -> ExecResult<Vec<RetrievedChunk>> {
        let catalog = if agent.has_skills() {
            self.resolver.resolve(agent).await?.0
        } else {
            self.resolver.resolve_default_context().await?
        };
        if catalog.is_empty() {
            return Ok(Vec::new());
        }

        let request = RouterRequest::new(
            agent.model_preference.clone(),
            vec![Message::system(RETRIEVAL_PROMPT), Message::user(input)],
        )
        .with_temperature(0.0)
        .with_max_tokens(agent.max_tokens);
        let request = match &agent.provider_preference {
            Some(p) => request.with_provider(p.clone()),
            None => request,
        };

        let policy = CallPolicy::for_agent(agent, self.router.catalog());
        let loop_ = ToolLoop::new(self.router.clone(), self.mcp.clone(), max_steps);
        let outcome = loop_.run(request, &catalog, &policy, None).await?;

        let total = outcome.tool_results.iter().filter(|r| r.ok).count() as u32;
        Ok(outcome
            .tool_results
            .into_iter()
            .filter(|r| r.ok && !r.text.is_empty())
            .enumerate()
            .map(|(i, r)| RetrievedChunk {
                chunk_id: Uuid::new_v4().to_string(),
                document_id: r.name.clone(),
                document_name: r.name,
                estimated_tokens: estimate_tokens(&r.text),
                content: r.text,
                score: 1.0,
                chunk_number: i as u32,
                chunk_total: total,
                source: ChunkSource::Mcp,
            })
            .collect())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::mcp::{McpToolDescriptor, McpToolOutcome};
    use crate::router::{FinishReason, Router, TokenUsage, ToolDescriptor};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn text_response(content: &str) -> RouterResponse {
        RouterResponse {
            content: content.to_string(),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: TokenUsage {
                prompt_tokens: 20,
                completion_tokens: 10,
            },
            cost_usd: 0.001,
            model_used: "m".to_string(),
            provider_used: "openai".to_string(),
            provider_latency_ms: 10,
            routing_reason: "primary".to_string(),
            attempt_count: 1,
            failed_providers: vec![],
        }
    }

    fn tool_response(calls: &[(&str, &str, &str)]) -> RouterResponse {
        let mut r = text_response("");
        r.finish_reason = FinishReason::ToolCalls;
        r.tool_calls = calls
            .iter()
            .map(|(id, name, args)| ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: args.to_string(),
            })
            .collect();
        r
    }

    /// Router that replays scripted responses and records each request.
    struct ScriptedRouter {
        script: Mutex<Vec<ExecResult<RouterResponse>>>,
        requests: Mutex<Vec<(Option<ToolChoice>, usize)>>,
    }

    impl ScriptedRouter {
        fn reliable(script: Vec<ExecResult<RouterResponse>>) -> (Arc<ReliableRouter>, Arc<Self>) {
            let inner = Arc::new(Self {
                script: Mutex::new(script),
                requests: Mutex::new(vec![]),
            });
            (
                Arc::new(ReliableRouter::new(inner.clone(), ProviderCatalog::new())),
                inner,
            )
        }
    }

    #[async_trait]
    impl Router for ScriptedRouter {
        async fn call(&self, request: &RouterRequest) -> ExecResult<RouterResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((request.tool_choice, request.messages.len()));
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Ok(text_response("done"));
            }
            script.remove(0)
        }
    }

    /// MCP client answering every call with `<name>:<echo of x>` or a fault.
    struct MockMcp {
        calls: AtomicU32,
        fail_tools: Vec<String>,
    }

    impl MockMcp {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_tools: vec![],
            })
        }

        fn failing(names: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_tools: names.iter().map(|s| s.to_string()).collect(),
            })
        }
    }

    #[async_trait]
    impl McpClient for MockMcp {
        async fn list_tools(&self, _base_url: &str) -> ExecResult<Vec<McpToolDescriptor>> {
            Ok(vec![])
        }

        async fn call_tool(
            &self,
            _base_url: &str,
            name: &str,
            _arguments: Value,
        ) -> ExecResult<McpToolOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_tools.iter().any(|f| f == name) {
                return Ok(McpToolOutcome {
                    text: "tool exploded".to_string(),
                    is_error: true,
                });
            }
            Ok(McpToolOutcome {
                text: format!("{name}-result"),
                is_error: false,
            })
        }
    }

    fn catalog(tools: &[&str]) -> ToolCatalog {
        let mut routes = HashMap::new();
        let descriptors = tools
            .iter()
            .map(|name| {
                routes.insert(name.to_string(), "http://tools".to_string());
                ToolDescriptor {
                    name: name.to_string(),
                    description: format!("{name} tool"),
                    parameters: serde_json::json!({"type": "object"}),
                }
            })
            .collect();
        ToolCatalog {
            tools: descriptors,
            routes,
            default_url: None,
        }
    }

    fn policy() -> CallPolicy {
        CallPolicy {
            retry: RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
            fallback: FallbackConfig::default(),
            required_features: vec![],
            estimated_cost: 0.0,
        }
    }

    fn request() -> RouterRequest {
        RouterRequest::new(
            "m",
            vec![Message::system("sys"), Message::user("chart my data")],
        )
    }

    #[tokio::test]
    async fn tool_call_round_trip() {
        let (router, inner) = ScriptedRouter::reliable(vec![
            Ok(tool_response(&[("t1", "make_chart", r#"{"x":[1,2]}"#)])),
            Ok(text_response("Here's your chart: https://charts/1.png")),
        ]);
        let mcp = MockMcp::new();
        let loop_ = ToolLoop::new(router, mcp.clone(), 10);

        let outcome = loop_
            .run(request(), &catalog(&["make_chart"]), &policy(), None)
            .await
            .unwrap();

        assert!(outcome.tools_used);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.response.content, "Here's your chart: https://charts/1.png");
        assert_eq!(mcp.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.tool_results.len(), 1);
        assert_eq!(outcome.tool_results[0].text, "make_chart-result");

        // First step forces a tool, later steps are free.
        let requests = inner.requests.lock().unwrap();
        assert_eq!(requests[0].0, Some(ToolChoice::Required));
        assert_eq!(requests[1].0, Some(ToolChoice::Auto));
        // Second request saw assistant turn + tool result appended.
        assert_eq!(requests[1].1, requests[0].1 + 2);
    }

    #[tokio::test]
    async fn failing_tool_embeds_fault_and_continues() {
        let (router, _) = ScriptedRouter::reliable(vec![
            Ok(tool_response(&[("t1", "broken", "{}")])),
            Ok(text_response("recovered")),
        ]);
        let loop_ = ToolLoop::new(router, MockMcp::failing(&["broken"]), 10);
        let outcome = loop_
            .run(request(), &catalog(&["broken"]), &policy(), None)
            .await
            .unwrap();
        assert_eq!(outcome.response.content, "recovered");
        assert!(!outcome.tool_results[0].ok);
        assert!(outcome.tool_results[0].text.contains("tool exploded"));
    }

    #[tokio::test]
    async fn unknown_tool_gets_fault_without_server_call() {
        let (router, _) = ScriptedRouter::reliable(vec![
            Ok(tool_response(&[("t1", "ghost_tool", "{}")])),
            Ok(text_response("ok")),
        ]);
        let mcp = MockMcp::new();
        let loop_ = ToolLoop::new(router, mcp.clone(), 10);
        let outcome = loop_
            .run(request(), &catalog(&["make_chart"]), &policy(), None)
            .await
            .unwrap();
        assert_eq!(mcp.calls.load(Ordering::SeqCst), 0);
        assert!(outcome.tool_results[0].text.contains("no server registered"));
    }

    #[tokio::test]
    async fn malformed_arguments_get_fault() {
        let (router, _) = ScriptedRouter::reliable(vec![
            Ok(tool_response(&[("t1", "make_chart", "not json")])),
            Ok(text_response("ok")),
        ]);
        let loop_ = ToolLoop::new(router, MockMcp::new(), 10);
        let outcome = loop_
            .run(request(), &catalog(&["make_chart"]), &policy(), None)
            .await
            .unwrap();
        assert!(outcome.tool_results[0].text.contains("not valid JSON"));
    }

    #[tokio::test]
    async fn batch_results_preserve_tool_call_order() {
        let (router, _) = ScriptedRouter::reliable(vec![
            Ok(tool_response(&[
                ("t1", "alpha", "{}"),
                ("t2", "beta", "{}"),
            ])),
            Ok(text_response("ok")),
        ]);
        let loop_ = ToolLoop::new(router, MockMcp::new(), 10);
        let outcome = loop_
            .run(request(), &catalog(&["alpha", "beta"]), &policy(), None)
            .await
            .unwrap();
        assert_eq!(outcome.tool_results[0].name, "alpha");
        assert_eq!(outcome.tool_results[1].name, "beta");
    }

    #[tokio::test]
    async fn iteration_cap_surfaces_last_assistant_turn() {
        let script: Vec<ExecResult<RouterResponse>> = (0..10)
            .map(|_| Ok(tool_response(&[("t", "make_chart", "{}")])))
            .collect();
        let (router, _) = ScriptedRouter::reliable(script);
        let loop_ = ToolLoop::new(router, MockMcp::new(), 3);
        let outcome = loop_
            .run(request(), &catalog(&["make_chart"]), &policy(), None)
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 3);
        assert!(outcome.response.has_tool_calls());
        assert_eq!(outcome.tool_results.len(), 3);
    }

    #[tokio::test]
    async fn zero_cap_is_single_auto_call() {
        let (router, inner) = ScriptedRouter::reliable(vec![Ok(text_response("direct"))]);
        let loop_ = ToolLoop::new(router, MockMcp::new(), 0);
        let outcome = loop_
            .run(request(), &catalog(&["make_chart"]), &policy(), None)
            .await
            .unwrap();
        assert!(!outcome.tools_used);
        assert_eq!(outcome.iterations, 0);
        let requests = inner.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, Some(ToolChoice::Auto));
    }

    #[tokio::test]
    async fn telemetry_merges_across_steps() {
        let mut first = tool_response(&[("t1", "make_chart", "{}")]);
        first.attempt_count = 2;
        first.failed_providers = vec!["groq".to_string()];
        let mut second = text_response("done");
        second.attempt_count = 2;
        let (router, _) = ScriptedRouter::reliable(vec![Ok(first), Ok(second)]);
        let loop_ = ToolLoop::new(router, MockMcp::new(), 10);
        let outcome = loop_
            .run(request(), &catalog(&["make_chart"]), &policy(), None)
            .await
            .unwrap();
        assert_eq!(outcome.telemetry.retry_attempts, 2);
        assert_eq!(outcome.telemetry.failed_providers, vec!["groq"]);
    }

    #[tokio::test]
    async fn llm_error_aborts_loop() {
        let (router, _) = ScriptedRouter::reliable(vec![Err(ExecError::Provider(
            "filtered".to_string(),
        ))]);
        let loop_ = ToolLoop::new(router, MockMcp::new(), 10);
        let failure = loop_
            .run(request(), &catalog(&["make_chart"]), &policy(), None)
            .await
            .unwrap_err();
        assert_eq!(failure.error.class(), ErrorClass::ProviderError);
    }

    #[tokio::test]
    async fn mid_loop_failure_keeps_earlier_step_telemetry() {
        // Step one succeeds after gateway-internal failover; step two fails
        // outright. The failure must still carry step one's telemetry.
        let mut first = tool_response(&[("t1", "make_chart", "{}")]);
        first.attempt_count = 2;
        first.failed_providers = vec!["groq".to_string()];
        let (router, _) = ScriptedRouter::reliable(vec![
            Ok(first),
            Err(ExecError::Provider("filtered".to_string())),
        ]);
        let loop_ = ToolLoop::new(router, MockMcp::new(), 10);
        let failure = loop_
            .run(request(), &catalog(&["make_chart"]), &policy(), None)
            .await
            .unwrap_err();
        assert_eq!(failure.error.class(), ErrorClass::ProviderError);
        assert_eq!(failure.telemetry.retry_attempts, 1);
        assert_eq!(failure.telemetry.failed_providers, vec!["groq"]);
    }

    #[test]
    fn tool_hint_lists_names() {
        let hint = tool_hint(&catalog(&["make_chart", "list_charts"]));
        assert!(hint.starts_with("\n\n"));
        assert!(hint.contains("make_chart"));
        assert!(hint.contains("list_charts"));
    }
}
