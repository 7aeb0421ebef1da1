//! End-to-end execution scenarios against a real orchestrator with mocked
//! collaborators: gateway router, vector search, chunk corpus, and MCP
//! servers.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use agentrelay::agent::{Agent, AgentType, InMemoryAgentStore};
use agentrelay::config::MemoryConfig;
use agentrelay::context::{
    ChunkQuery, ChunkStore, ContextAssembler, DocumentContextConfig, StoredChunk, VectorHit,
    VectorQuery, VectorSearch, VectorSearchResult,
};
use agentrelay::error::{ErrorClass, ExecError, ExecResult};
use agentrelay::execution::{
    ExecutionRecorder, ExecutionRequest, ExecutionStatus, Orchestrator, SqliteRecorder,
};
use agentrelay::mcp::{McpClient, McpToolDescriptor, McpToolOutcome};
use agentrelay::memory::{HashEmbeddingProvider, InMemoryLongTerm, MemoryManager, SessionKey};
use agentrelay::router::{
    FallbackConfig, FinishReason, ProviderCatalog, ProviderInfo, ReliableRouter, RetryConfig,
    Router, RouterRequest, RouterResponse, TokenUsage, ToolCall,
};
use agentrelay::skills::{InMemorySkillStore, Skill, ToolResolver};

// ─── Mock collaborators ──────────────────────────────────────────────────────

struct ScriptedRouter {
    script: Mutex<Vec<ExecResult<RouterResponse>>>,
    requests: Mutex<Vec<RouterRequest>>,
}

impl ScriptedRouter {
    fn new(script: Vec<ExecResult<RouterResponse>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            requests: Mutex::new(vec![]),
        })
    }

    fn requests(&self) -> Vec<RouterRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Router for ScriptedRouter {
    async fn call(&self, request: &RouterRequest) -> ExecResult<RouterResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Err(ExecError::Internal("script exhausted".to_string()));
        }
        script.remove(0)
    }
}

struct MockVector {
    hits: Vec<VectorHit>,
    calls: AtomicU32,
}

impl MockVector {
    fn new(hits: Vec<VectorHit>) -> Arc<Self> {
        Arc::new(Self {
            hits,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl VectorSearch for MockVector {
    async fn search(&self, _query: &VectorQuery) -> ExecResult<VectorSearchResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(VectorSearchResult {
            results: self.hits.clone(),
            query_time_ms: 3,
        })
    }
}

struct EmptyChunks;

#[async_trait]
impl ChunkStore for EmptyChunks {
    async fn fetch(&self, _query: &ChunkQuery) -> ExecResult<Vec<StoredChunk>> {
        Ok(vec![])
    }
}

struct MockMcp {
    tools_by_url: HashMap<String, Vec<String>>,
    results: HashMap<String, String>,
    calls: AtomicU32,
}

impl MockMcp {
    fn new(tools_by_url: &[(&str, &[&str])], results: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            tools_by_url: tools_by_url
                .iter()
                .map(|(u, ts)| (u.to_string(), ts.iter().map(|t| t.to_string()).collect()))
                .collect(),
            results: results
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl McpClient for MockMcp {
    async fn list_tools(&self, base_url: &str) -> ExecResult<Vec<McpToolDescriptor>> {
        let names = self
            .tools_by_url
            .get(base_url)
            .ok_or_else(|| ExecError::Connection(format!("no mcp server at {base_url}")))?;
        Ok(names
            .iter()
            .map(|n| McpToolDescriptor {
                name: n.clone(),
                description: format!("{n} tool"),
                input_schema: serde_json::json!({"type": "object"}),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        _base_url: &str,
        name: &str,
        _arguments: Value,
    ) -> ExecResult<McpToolOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(McpToolOutcome {
            text: self
                .results
                .get(name)
                .cloned()
                .unwrap_or_else(|| format!("{name}-result")),
            is_error: false,
        })
    }
}

// ─── Responses ───────────────────────────────────────────────────────────────

fn success(content: &str, prompt: u32, completion: u32, cost: f64, provider: &str) -> RouterResponse {
    RouterResponse {
        content: content.to_string(),
        tool_calls: vec![],
        finish_reason: FinishReason::Stop,
        usage: TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        },
        cost_usd: cost,
        model_used: "gpt-3.5-turbo".to_string(),
        provider_used: provider.to_string(),
        provider_latency_ms: 120,
        routing_reason: "primary".to_string(),
        attempt_count: 1,
        failed_providers: vec![],
    }
}

fn tool_call_response(id: &str, name: &str, arguments: &str) -> RouterResponse {
    let mut r = success("", 30, 5, 0.001, "openai");
    r.finish_reason = FinishReason::ToolCalls;
    r.tool_calls = vec![ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }];
    r
}

fn timeout() -> ExecError {
    ExecError::Timeout {
        scope: "llm gateway call".to_string(),
        after: Duration::from_secs(60),
    }
}

fn connection_refused() -> ExecError {
    ExecError::Connection("connection refused".to_string())
}

// ─── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
    orchestrator: Orchestrator,
    router: Arc<ScriptedRouter>,
    vector: Arc<MockVector>,
    recorder: Arc<SqliteRecorder>,
    memory: Arc<MemoryManager>,
    agents: Arc<InMemoryAgentStore>,
    skills: Arc<InMemorySkillStore>,
}

fn harness(script: Vec<ExecResult<RouterResponse>>, hits: Vec<VectorHit>) -> Harness {
    harness_with_mcp(script, hits, MockMcp::new(&[], &[]))
}

fn harness_with_mcp(
    script: Vec<ExecResult<RouterResponse>>,
    hits: Vec<VectorHit>,
    mcp: Arc<MockMcp>,
) -> Harness {
    let mut catalog = ProviderCatalog::new();
    catalog.insert(ProviderInfo {
        name: "openai".to_string(),
        features: ["tools".to_string()].into_iter().collect(),
        est_cost_per_request: 0.002,
    });
    catalog.insert(ProviderInfo {
        name: "anthropic".to_string(),
        features: ["tools".to_string()].into_iter().collect(),
        est_cost_per_request: 0.003,
    });

    let router_inner = ScriptedRouter::new(script);
    let router = Arc::new(ReliableRouter::new(router_inner.clone(), catalog));

    let vector = MockVector::new(hits);
    let assembler = Arc::new(ContextAssembler::new(vector.clone(), Arc::new(EmptyChunks)));

    let memory = Arc::new(MemoryManager::new(
        MemoryConfig::default(),
        Arc::new(InMemoryLongTerm::new(Arc::new(HashEmbeddingProvider::new()))),
    ));

    let agents = Arc::new(InMemoryAgentStore::new());
    let skills = Arc::new(InMemorySkillStore::new());
    let resolver = Arc::new(ToolResolver::new(
        skills.clone(),
        mcp.clone(),
        "http://context.internal",
    ));

    let recorder = Arc::new(SqliteRecorder::open_in_memory().unwrap());

    let orchestrator = Orchestrator::new(
        agents.clone(),
        resolver,
        assembler,
        memory.clone(),
        router,
        mcp,
        recorder.clone(),
        10,
    );

    Harness {
        orchestrator,
        router: router_inner,
        vector,
        recorder,
        memory,
        agents,
        skills,
    }
}

fn base_agent() -> Agent {
    let mut agent = Agent::new(
        "a-1",
        "t-1",
        "Helper",
        "You are a helpful assistant.",
        AgentType::Conversational,
    );
    agent.model_preference = "gpt-3.5-turbo".to_string();
    agent.provider_preference = Some("openai".to_string());
    agent.retry = Some(RetryConfig {
        max_attempts: 1,
        ..RetryConfig::default()
    });
    agent
}

fn request(input: &str) -> ExecutionRequest {
    ExecutionRequest::new("a-1", "u-1", "t-1", input)
}

// ─── Scenario 1: no-retry, no-tools success ──────────────────────────────────

#[tokio::test]
async fn no_retry_no_tools_success() {
    let h = harness(vec![Ok(success("Hi there.", 50, 10, 0.001, "openai"))], vec![]);
    h.agents.insert(base_agent());

    let response = h.orchestrator.execute(request("Hello")).await.unwrap();

    assert_eq!(response.output, "Hi there.");
    assert_eq!(response.tokens_used, 60);
    assert_eq!(response.cost_usd, 0.001);
    assert_eq!(response.metadata.provider, "openai");
    assert!(!response.metadata.mcp_tools_used);

    let record = h
        .recorder
        .get(&response.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.telemetry.retry_attempts, 0);
    assert!(!record.telemetry.fallback_used);
    assert!(record.telemetry.failed_providers.is_empty());
    let output = record.output.unwrap();
    assert!(output.tokens.total() > 0);
    assert!(record.actual_cost_usd >= 0.0);
}

// ─── Scenario 2: retry succeeds on attempt 3 ─────────────────────────────────

#[tokio::test(start_paused = true)]
async fn retry_succeeds_on_third_attempt() {
    let h = harness(
        vec![
            Err(timeout()),
            Err(timeout()),
            Ok(success("Recovered.", 40, 8, 0.002, "openai")),
        ],
        vec![],
    );
    let mut agent = base_agent();
    agent.retry = Some(RetryConfig::high_reliability());
    h.agents.insert(agent);

    let response = h.orchestrator.execute(request("Hello")).await.unwrap();
    assert_eq!(response.output, "Recovered.");

    let record = h
        .recorder
        .get(&response.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.telemetry.retry_attempts, 2);
    // Exponential preset: 1 s before attempt 2, 2 s before attempt 3.
    assert!(record.telemetry.total_retry_time_ms >= 3000);
    assert!(!record.telemetry.fallback_used);
}

// ─── Scenario 3: fallback engaged ────────────────────────────────────────────

#[tokio::test]
async fn fallback_to_second_provider() {
    let h = harness(
        vec![
            Err(connection_refused()),
            Err(connection_refused()),
            Ok(success("From anthropic.", 40, 10, 0.003, "anthropic")),
        ],
        vec![],
    );
    let mut agent = base_agent();
    agent.required_features = vec!["tools".to_string()];
    agent.retry = Some(RetryConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..RetryConfig::default()
    });
    agent.fallback = Some(FallbackConfig {
        enabled: true,
        preferred_chain: vec!["openai".to_string(), "anthropic".to_string()],
        max_cost_increase: 0.5,
        require_same_features: true,
    });
    h.agents.insert(agent);

    let response = h.orchestrator.execute(request("Hello")).await.unwrap();
    assert_eq!(response.output, "From anthropic.");
    assert_eq!(response.metadata.routing_strategy, "fallback:anthropic");

    let record = h
        .recorder
        .get(&response.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.telemetry.fallback_used);
    assert_eq!(record.telemetry.failed_providers, vec!["openai"]);
    assert_eq!(record.telemetry.retry_attempts, 1);
    assert_eq!(record.telemetry.routing_reason, "fallback:anthropic");
}

// ─── Scenario 4: tool loop ───────────────────────────────────────────────────

#[tokio::test]
async fn tool_loop_round_trip() {
    let mcp = MockMcp::new(
        &[("http://charts", &["make_chart"][..])],
        &[("make_chart", "https://charts.example/chart.png")],
    );
    let h = harness_with_mcp(
        vec![
            Ok(tool_call_response("t1", "make_chart", r#"{"x":[1,2]}"#)),
            Ok(success(
                "Here's your chart: https://charts.example/chart.png",
                60,
                20,
                0.002,
                "openai",
            )),
        ],
        vec![],
        mcp,
    );
    let mut agent = base_agent();
    agent.skill_ids = vec!["s-charts".to_string()];
    h.agents.insert(agent);
    h.skills.insert(Skill::mcp("s-charts", "charts", "http://charts"));

    let response = h
        .orchestrator
        .execute(request("chart my data"))
        .await
        .unwrap();

    assert!(response.output.contains("https://charts.example/chart.png"));
    assert!(response.metadata.mcp_tools_used);

    // The second LLM step saw the assistant tool-call turn and a tool
    // message answering exactly that call id.
    let requests = h.router.requests();
    assert_eq!(requests.len(), 2);
    let second = &requests[1];
    let tool_msg = second
        .messages
        .iter()
        .find(|m| m.tool_call_id.is_some())
        .unwrap();
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("t1"));
    assert!(tool_msg.content.contains("chart.png"));

    // Tool hint was appended to the system message, not a separate turn.
    assert!(requests[0].messages[0].content.contains("make_chart"));
    let system_count = requests[0]
        .messages
        .iter()
        .filter(|m| m.content.contains("make_chart"))
        .count();
    assert_eq!(system_count, 1);
}

// ─── Scenario 5: vector context assembly ─────────────────────────────────────

fn hit(id: &str, score: f32, content: &str) -> VectorHit {
    VectorHit {
        chunk_id: id.to_string(),
        document_id: "doc-1".to_string(),
        document_name: Some("Handbook".to_string()),
        content: content.to_string(),
        score,
        chunk_number: 0,
        is_summary: false,
    }
}

fn knowledge_agent() -> Agent {
    let mut agent = base_agent();
    agent.agent_type = AgentType::Qa;
    agent.enable_knowledge = true;
    agent.notebook_ids = vec![uuid::Uuid::nil()];
    agent.document_context = Some(DocumentContextConfig {
        top_k: 3,
        min_score: 0.7,
        ..DocumentContextConfig::default()
    });
    agent
}

#[tokio::test]
async fn vector_context_filters_and_injects() {
    let h = harness(
        vec![Ok(success("Answer.", 90, 10, 0.001, "openai"))],
        vec![
            hit("c1", 0.92, "alpha facts"),
            hit("c2", 0.81, "beta facts"),
            hit("c3", 0.65, "gamma facts"),
        ],
    );
    h.agents.insert(knowledge_agent());

    let response = h
        .orchestrator
        .execute(request("what are the facts"))
        .await
        .unwrap();

    let ctx = &response.metadata.context_metadata;
    assert_eq!(ctx.strategy, "vector");
    assert_eq!(ctx.chunk_count, 2);
    assert!(ctx.knowledge_enabled);
    assert!(!ctx.context_empty);

    // Both surviving chunks are in the system prompt; the sub-threshold one
    // is not.
    let system = &h.router.requests()[0].messages[0].content;
    assert!(system.contains("--- RELEVANT DOCUMENTS ---"));
    assert!(system.contains("alpha facts"));
    assert!(system.contains("beta facts"));
    assert!(!system.contains("gamma facts"));
}

#[tokio::test]
async fn empty_retrieval_still_reports_knowledge_enabled() {
    let h = harness(vec![Ok(success("Answer.", 20, 5, 0.001, "openai"))], vec![]);
    h.agents.insert(knowledge_agent());

    let response = h.orchestrator.execute(request("anything")).await.unwrap();
    let ctx = &response.metadata.context_metadata;
    assert!(ctx.knowledge_enabled);
    assert!(ctx.context_empty);
    assert_eq!(ctx.chunk_count, 0);
    assert!(!h.router.requests()[0].messages[0]
        .content
        .contains("RELEVANT DOCUMENTS"));
}

// ─── Scenario 6: knowledge-disable short-circuit ─────────────────────────────

#[tokio::test]
async fn disable_knowledge_skips_vector_search() {
    let h = harness(
        vec![Ok(success("Answer.", 20, 5, 0.001, "openai"))],
        vec![hit("c1", 0.92, "alpha facts")],
    );
    h.agents.insert(knowledge_agent());

    let mut req = request("what are the facts");
    req.disable_knowledge = true;
    let response = h.orchestrator.execute(req).await.unwrap();

    assert_eq!(h.vector.calls.load(Ordering::SeqCst), 0);
    assert!(!response.metadata.context_metadata.knowledge_enabled);
    assert_eq!(response.metadata.context_metadata.strategy, "none");
}

#[tokio::test]
async fn disable_knowledge_matches_knowledge_off_messages() {
    // Law: disable_knowledge=true produces the same messages as an agent
    // with enable_knowledge=false.
    let h1 = harness(
        vec![Ok(success("A.", 20, 5, 0.001, "openai"))],
        vec![hit("c1", 0.92, "alpha")],
    );
    h1.agents.insert(knowledge_agent());
    let mut req = request("q");
    req.disable_knowledge = true;
    h1.orchestrator.execute(req).await.unwrap();

    let h2 = harness(
        vec![Ok(success("A.", 20, 5, 0.001, "openai"))],
        vec![hit("c1", 0.92, "alpha")],
    );
    let mut agent_off = knowledge_agent();
    agent_off.enable_knowledge = false;
    h2.agents.insert(agent_off);
    h2.orchestrator.execute(request("q")).await.unwrap();

    let m1: Vec<String> = h1.router.requests()[0]
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect();
    let m2: Vec<String> = h2.router.requests()[0]
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(m1, m2);
}

// ─── Memory behaviour ────────────────────────────────────────────────────────

#[tokio::test]
async fn memory_write_back_grows_buffer_by_two() {
    let h = harness(vec![Ok(success("Sure.", 20, 5, 0.001, "openai"))], vec![]);
    let mut agent = base_agent();
    agent.enable_memory = true;
    h.agents.insert(agent);

    let mut req = request("remember this");
    req.session_id = Some("s-1".to_string());
    h.orchestrator.execute(req).await.unwrap();

    let key = SessionKey::new("t-1", "a-1", "s-1");
    assert_eq!(h.memory.short_term().len(&key), 2);
}

#[tokio::test]
async fn second_turn_sees_short_term_transcript() {
    let h = harness(
        vec![
            Ok(success("First answer.", 20, 5, 0.001, "openai")),
            Ok(success("Second answer.", 20, 5, 0.001, "openai")),
        ],
        vec![],
    );
    let mut agent = base_agent();
    agent.enable_memory = true;
    h.agents.insert(agent);

    let mut first = request("first question");
    first.session_id = Some("s-1".to_string());
    h.orchestrator.execute(first).await.unwrap();

    let mut second = request("second question");
    second.session_id = Some("s-1".to_string());
    h.orchestrator.execute(second).await.unwrap();

    let requests = h.router.requests();
    let transcript = requests[1]
        .messages
        .iter()
        .find(|m| m.content.starts_with("Recent conversation:"))
        .unwrap();
    assert!(transcript.content.contains("first question"));
    assert!(transcript.content.contains("First answer."));
}

// ─── Failure paths ───────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_input_is_validation_error() {
    let h = harness(vec![], vec![]);
    h.agents.insert(base_agent());
    let err = h.orchestrator.execute(request("   ")).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);
}

#[tokio::test]
async fn unknown_agent_is_not_found() {
    let h = harness(vec![], vec![]);
    let err = h.orchestrator.execute(request("hello")).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
}

#[tokio::test]
async fn cross_tenant_access_reads_as_absence() {
    let h = harness(vec![], vec![]);
    h.agents.insert(base_agent());
    let mut req = request("hello");
    req.tenant_id = "other-tenant".to_string();
    req.user_id = "someone-else".to_string();
    let err = h.orchestrator.execute(req).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
}

#[tokio::test]
async fn exhausted_retries_and_fallback_persist_real_telemetry() {
    // Both primary attempts fail, then the only eligible fallback provider
    // fails too. The terminal Failed record must carry the telemetry that
    // was actually accumulated, not zeros.
    let h = harness(
        vec![
            Err(connection_refused()),
            Err(connection_refused()),
            Err(ExecError::ProviderUnavailable("anthropic down".to_string())),
        ],
        vec![],
    );
    let mut agent = base_agent();
    agent.required_features = vec!["tools".to_string()];
    agent.retry = Some(RetryConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..RetryConfig::default()
    });
    agent.fallback = Some(FallbackConfig {
        enabled: true,
        preferred_chain: vec!["openai".to_string(), "anthropic".to_string()],
        max_cost_increase: 0.5,
        require_same_features: true,
    });
    h.agents.insert(agent);

    let err = h.orchestrator.execute(request("hello")).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::ProviderUnavailable);

    let record = h.recorder.latest_for_agent("a-1").unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.telemetry.retry_attempts, 1);
    assert_eq!(
        record.telemetry.failed_providers,
        vec!["openai".to_string(), "anthropic".to_string()]
    );
    assert!(record.telemetry.total_retry_time_ms > 0);
    assert!(!record.telemetry.fallback_used);
    assert!(record.error_message.is_some());
    assert!(record.output.is_none());

    // Failed-record telemetry flows into the aggregates used by the
    // reliability score.
    let stats = h.recorder.stats("a-1").await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.completed, 0);
    assert!((stats.avg_retry_attempts - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn llm_failure_surfaces_provider_error() {
    let h = harness(
        vec![Err(ExecError::Provider(
            "raw upstream stack trace".to_string(),
        ))],
        vec![],
    );
    h.agents.insert(base_agent());

    let err = h.orchestrator.execute(request("hello")).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::ProviderError);
}

#[tokio::test]
async fn context_failure_degrades_to_annotation() {
    struct FailingVector;
    #[async_trait]
    impl VectorSearch for FailingVector {
        async fn search(&self, _query: &VectorQuery) -> ExecResult<VectorSearchResult> {
            Err(ExecError::Timeout {
                scope: "vector search".to_string(),
                after: Duration::from_secs(30),
            })
        }
    }

    // Hand-built harness with a failing vector collaborator.
    let mut catalog = ProviderCatalog::new();
    catalog.insert(ProviderInfo {
        name: "openai".to_string(),
        features: Default::default(),
        est_cost_per_request: 0.002,
    });
    let router_inner = ScriptedRouter::new(vec![Ok(success("Still fine.", 20, 5, 0.001, "openai"))]);
    let router = Arc::new(ReliableRouter::new(router_inner.clone(), catalog));
    let assembler = Arc::new(ContextAssembler::new(
        Arc::new(FailingVector),
        Arc::new(EmptyChunks),
    ));
    let memory = Arc::new(MemoryManager::new(
        MemoryConfig::default(),
        Arc::new(InMemoryLongTerm::new(Arc::new(HashEmbeddingProvider::new()))),
    ));
    let agents = Arc::new(InMemoryAgentStore::new());
    let skills = Arc::new(InMemorySkillStore::new());
    let mcp = MockMcp::new(&[], &[]);
    let resolver = Arc::new(ToolResolver::new(skills, mcp.clone(), "http://ctx"));
    let recorder = Arc::new(SqliteRecorder::open_in_memory().unwrap());
    let orchestrator = Orchestrator::new(
        agents.clone(),
        resolver,
        assembler,
        memory,
        router,
        mcp,
        recorder,
        10,
    );
    agents.insert(knowledge_agent());

    let response = orchestrator.execute(request("q")).await.unwrap();
    assert_eq!(response.output, "Still fine.");
    let annotations = &response.metadata.context_metadata.annotations;
    assert!(annotations.iter().any(|a| a.contains("timeout")));
}
