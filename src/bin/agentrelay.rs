//! Headless execution service binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use agentrelay::{
    agent::InMemoryAgentStore,
    config::{ServiceConfig, load_config, load_default_config},
    context::{ContextAssembler, HttpChunkStore, HttpVectorSearch},
    error::{ExecError, ExecResult},
    execution::{McpContextRetriever, Orchestrator, SqliteRecorder},
    gateway::{self, AppState},
    mcp::HttpMcpClient,
    memory::{CachedEmbeddings, HashEmbeddingProvider, InMemoryLongTerm, MemoryManager},
    router::{HttpRouterClient, ProviderCatalog, ReliableRouter, RouterClientConfig},
    skills::{InMemorySkillStore, ToolResolver},
};

#[derive(Debug, Parser)]
#[command(name = "agentrelay", about = "Multi-tenant AI agent execution service")]
struct Args {
    /// Config file path (default: ~/.agentrelay/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agentrelay=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(args: Args) -> ExecResult<()> {
    let mut config: ServiceConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => load_default_config(),
    };
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    // LLM gateway under the reliability policy engine.
    let catalog = ProviderCatalog::from_config(&config.providers);
    let router_client = HttpRouterClient::new(
        RouterClientConfig {
            base_url: config.llm_gateway.base_url.clone(),
            api_key: config.llm_gateway.api_key.clone(),
            use_api_key_header: config.llm_gateway.use_api_key_header,
            timeout: Duration::from_secs(config.llm_gateway.request_timeout_secs),
        },
    )?;
    let router = Arc::new(ReliableRouter::new(Arc::new(router_client), catalog));

    // Retrieval collaborators.
    let retrieval_timeout = Duration::from_secs(config.retrieval.request_timeout_secs);
    let vector = Arc::new(HttpVectorSearch::new(
        config.retrieval.vector_base_url.clone(),
        retrieval_timeout,
    )?);
    let chunks = Arc::new(HttpChunkStore::new(
        config.retrieval.chunk_base_url.clone(),
        retrieval_timeout,
    )?);

    // Tools.
    let mcp = Arc::new(HttpMcpClient::new(Duration::from_secs(
        config.mcp.tool_timeout_secs,
    ))?);
    let skills = Arc::new(InMemorySkillStore::new());
    let resolver = Arc::new(ToolResolver::new(
        skills,
        mcp.clone(),
        config.mcp.default_context_url.clone(),
    ));

    // Context assembly, with autonomous mcp retrieval wired through the
    // tool loop.
    let retriever = Arc::new(McpContextRetriever::new(
        router.clone(),
        mcp.clone(),
        resolver.clone(),
    ));
    let assembler = Arc::new(
        ContextAssembler::new(vector, chunks)
            .with_mcp_source(retriever, config.mcp.context_step_budget),
    );

    // Memory tiers.
    let embedder = Arc::new(CachedEmbeddings::new(
        Box::new(HashEmbeddingProvider::new()),
        config.memory.embedding_cache_size,
    ));
    let memory = Arc::new(MemoryManager::new(
        config.memory.clone(),
        Arc::new(InMemoryLongTerm::new(embedder)),
    ));

    // Durable records.
    let recorder = Arc::new(SqliteRecorder::open(&config.database.path)?);

    // Agent storage is owned by the management plane; this service only
    // loads by id.
    let agents = Arc::new(InMemoryAgentStore::new());

    let orchestrator = Arc::new(Orchestrator::new(
        agents,
        resolver,
        assembler,
        memory,
        router,
        mcp,
        recorder.clone(),
        config.mcp.max_tool_iterations,
    ));

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .map_err(|e| ExecError::Internal(format!("invalid listen address: {e}")))?;

    gateway::serve(
        addr,
        Arc::new(AppState {
            orchestrator,
            recorder,
        }),
    )
    .await
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();
    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "agentrelay failed to start");
        std::process::exit(1);
    }
}
