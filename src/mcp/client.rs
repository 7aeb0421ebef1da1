//! HTTP MCP client.
//!
//! MCP servers expose a dynamic tool set over two endpoints:
//! - `GET {base_url}/mcp/tools/list` → `{tools: [{name, description, inputSchema}]}`
//! - `POST {base_url}/mcp/tools/call` with `{name, arguments}` →
//!   `{content: [{type, text}], isError?}`
//!
//! Tool failures are data, not errors: an `isError` result becomes an
//! [`McpToolOutcome`] with `is_error = true` so the tool loop can embed the
//! fault for the model to react to.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExecError, ExecResult};

/// Per-tool invocation timeout.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Tool discovery timeout.
const LIST_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Descriptors ─────────────────────────────────────────────────────────────

/// A tool advertised by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ToolListResponse {
    #[serde(default)]
    tools: Vec<McpToolDescriptor>,
}

/// The textual result of one tool invocation.
#[derive(Debug, Clone)]
pub struct McpToolOutcome {
    pub text: String,
    pub is_error: bool,
}

#[derive(Debug, Serialize)]
struct ToolCallRequest<'a> {
    name: &'a str,
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ToolCallResponse {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

// ─── McpClient seam ──────────────────────────────────────────────────────────

/// Tool discovery and invocation against an MCP server at `base_url`.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn list_tools(&self, base_url: &str) -> ExecResult<Vec<McpToolDescriptor>>;

    async fn call_tool(
        &self,
        base_url: &str,
        name: &str,
        arguments: Value,
    ) -> ExecResult<McpToolOutcome>;
}

// ─── HttpMcpClient ───────────────────────────────────────────────────────────

/// Reqwest-backed MCP client. One instance serves every MCP server; the
/// server is addressed per call via `base_url`.
pub struct HttpMcpClient {
    list_client: Client,
    call_client: Client,
    call_timeout: Duration,
}

impl HttpMcpClient {
    pub fn new(call_timeout: Duration) -> ExecResult<Self> {
        let list_client = Client::builder()
            .timeout(LIST_TIMEOUT)
            .build()
            .map_err(|e| ExecError::Internal(format!("failed to build HTTP client: {e}")))?;
        let call_client = Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| ExecError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            list_client,
            call_client,
            call_timeout,
        })
    }

    pub fn with_default_timeout() -> ExecResult<Self> {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

#[async_trait]
impl McpClient for HttpMcpClient {
    async fn list_tools(&self, base_url: &str) -> ExecResult<Vec<McpToolDescriptor>> {
        let response = self
            .list_client
            .get(format!("{base_url}/mcp/tools/list"))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecError::Timeout {
                        scope: "mcp tools/list".to_string(),
                        after: LIST_TIMEOUT,
                    }
                } else {
                    ExecError::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecError::Connection(format!(
                "mcp tools/list returned {status}"
            )));
        }

        let list = response
            .json::<ToolListResponse>()
            .await
            .map_err(|e| ExecError::Connection(format!("malformed tools/list response: {e}")))?;
        Ok(list.tools)
    }

    async fn call_tool(
        &self,
        base_url: &str,
        name: &str,
        arguments: Value,
    ) -> ExecResult<McpToolOutcome> {
        let response = self
            .call_client
            .post(format!("{base_url}/mcp/tools/call"))
            .json(&ToolCallRequest { name, arguments })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecError::Timeout {
                        scope: format!("mcp tool '{name}'"),
                        after: self.call_timeout,
                    }
                } else {
                    ExecError::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecError::Tool {
                name: name.to_string(),
                message: format!("mcp tools/call returned {status}"),
            });
        }

        let body = response
            .json::<ToolCallResponse>()
            .await
            .map_err(|e| ExecError::Tool {
                name: name.to_string(),
                message: format!("malformed tools/call response: {e}"),
            })?;

        Ok(outcome_from_body(body))
    }
}

fn outcome_from_body(body: ToolCallResponse) -> McpToolOutcome {
    let text = body
        .content
        .iter()
        .filter(|c| c.kind == "text" || c.kind.is_empty())
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    McpToolOutcome {
        text,
        is_error: body.is_error,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
