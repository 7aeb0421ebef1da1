//! Router client: one attempt against the upstream LLM gateway.
//!
//! The client speaks the gateway's OpenAI-compatible chat-completions
//! contract and surfaces the gateway's own reliability metadata
//! (`provider`, `routing_reason`, `cost_usd`, `provider_latency_ms`,
//! `attempt_count`, `failed_providers`). Retry and fallback live one layer
//! up, in [`crate::router::reliability`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExecError, ExecResult};

use super::types::{
    FinishReason, Message, MessageRole, RouterRequest, RouterResponse, TokenUsage, ToolCall,
    ToolChoice, ToolDescriptor,
};

/// Default per-attempt timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// ─── Router seam ─────────────────────────────────────────────────────────────

/// A single LLM-gateway attempt. Implementations never retry internally.
#[async_trait]
pub trait Router: Send + Sync {
    async fn call(&self, request: &RouterRequest) -> ExecResult<RouterResponse>;
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDescriptor,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
    optimize_for: super::types::OptimizeFor,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "str::is_empty")]
    user: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    model: String,
    // Gateway extensions beyond the OpenAI schema.
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    routing_reason: Option<String>,
    #[serde(default)]
    cost_usd: Option<f64>,
    #[serde(default)]
    provider_latency_ms: Option<u64>,
    #[serde(default)]
    attempt_count: Option<u32>,
    #[serde(default)]
    failed_providers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<FinishReason>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// ─── HttpRouterClient ────────────────────────────────────────────────────────

/// Configuration for [`HttpRouterClient`].
#[derive(Debug, Clone)]
pub struct RouterClientConfig {
    /// Base URL including the `/v1` prefix.
    pub base_url: String,
    /// API key; empty disables the auth header.
    pub api_key: String,
    /// Send the key as `X-API-Key` instead of `Authorization: Bearer`.
    pub use_api_key_header: bool,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl RouterClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            use_api_key_header: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// HTTP client for the upstream LLM gateway.
pub struct HttpRouterClient {
    client: Client,
    config: RouterClientConfig,
}

impl HttpRouterClient {
    pub fn new(config: RouterClientConfig) -> ExecResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExecError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn convert_message(msg: &Message) -> ApiMessage {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|tc| ApiToolCall {
                        id: tc.id.clone(),
                        kind: "function".to_string(),
                        function: ApiFunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect(),
            )
        };
        ApiMessage {
            role,
            content: msg.content.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    fn build_body<'a>(request: &'a RouterRequest) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &request.model,
            messages: request.messages.iter().map(Self::convert_message).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            stream: false,
            optimize_for: request.optimize_for,
            provider: request.provider.as_deref(),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(
                    request
                        .tools
                        .iter()
                        .map(|t| ApiTool {
                            kind: "function",
                            function: t,
                        })
                        .collect(),
                )
            },
            tool_choice: request.tool_choice,
            user: &request.user_id,
        }
    }

    /// Map a non-success status to the error taxonomy, normalising the body.
    fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ExecError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ExecError::Unauthorized("gateway rejected credentials".to_string())
            }
            StatusCode::TOO_MANY_REQUESTS => ExecError::RateLimit { retry_after },
            s if s.is_server_error() => {
                ExecError::ProviderUnavailable(format!("gateway returned {s}"))
            }
            s => ExecError::Provider(format!("gateway returned {s}: {body}")),
        }
    }
}

#[async_trait]
impl Router for HttpRouterClient {
    async fn call(&self, request: &RouterRequest) -> ExecResult<RouterResponse> {
        let body = Self::build_body(request);

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Content-Type", "application/json");

        if !self.config.api_key.is_empty() {
            builder = if self.config.use_api_key_header {
                builder.header("X-API-Key", &self.config.api_key)
            } else {
                builder.header("Authorization", format!("Bearer {}", self.config.api_key))
            };
        }

        let response = builder.json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                ExecError::Timeout {
                    scope: "llm gateway call".to_string(),
                    after: self.config.timeout,
                }
            } else {
                ExecError::from(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            // Detect the gateway's explicit provider-health signal in
            // otherwise-generic error bodies.
            if text.contains("provider_unhealthy") {
                return Err(ExecError::ProviderUnavailable(
                    "gateway reported provider_unhealthy".to_string(),
                ));
            }
            return Err(Self::classify_status(status, retry_after, &text));
        }

        let api: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ExecError::Provider(format!("malformed gateway response: {e}")))?;

        into_response(api)
    }
}

fn into_response(api: ChatCompletionResponse) -> ExecResult<RouterResponse> {
    let usage = api
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let choice = api
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ExecError::Provider("no choices in gateway response".to_string()))?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    let finish_reason = choice.finish_reason.unwrap_or(if tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolCalls
    });

    Ok(RouterResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason,
        usage,
        cost_usd: api.cost_usd.unwrap_or(0.0),
        model_used: api.model,
        provider_used: api.provider.unwrap_or_default(),
        provider_latency_ms: api.provider_latency_ms.unwrap_or(0),
        routing_reason: api.routing_reason.unwrap_or_default(),
        attempt_count: api.attempt_count.unwrap_or(1),
        failed_providers: api.failed_providers,
    })
}

/// Parse a raw gateway response body; exposed for tests against captured
/// payloads.
pub fn parse_gateway_body(body: &Value) -> ExecResult<RouterResponse> {
    let api: ChatCompletionResponse = serde_json::from_value(body.clone())
        .map_err(|e| ExecError::Provider(format!("malformed gateway response: {e}")))?;
    into_response(api)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_includes_gateway_extensions() {
        let req = RouterRequest::new("gpt-4o-mini", vec![Message::user("hi")])
            .with_provider("openai")
            .with_temperature(0.7)
            .with_user("u-1");
        let body = HttpRouterClient::build_body(&req);
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["model"], "gpt-4o-mini");
        assert_eq!(v["provider"], "openai");
        assert_eq!(v["optimize_for"], "reliability");
        assert_eq!(v["stream"], false);
        assert_eq!(v["user"], "u-1");
        assert!(v.get("tools").is_none());
    }

    #[test]
    fn body_wraps_tools_in_function_shape() {
        let req = RouterRequest::new("m", vec![Message::user("hi")]).with_tools(
            vec![ToolDescriptor {
                name: "make_chart".to_string(),
                description: "draws a chart".to_string(),
                parameters: json!({"type": "object"}),
            }],
            ToolChoice::Required,
        );
        let v = serde_json::to_value(HttpRouterClient::build_body(&req)).unwrap();
        assert_eq!(v["tools"][0]["type"], "function");
        assert_eq!(v["tools"][0]["function"]["name"], "make_chart");
        assert_eq!(v["tool_choice"], "required");
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let msg = Message::tool("result text", "call_7");
        let api = HttpRouterClient::convert_message(&msg);
        let v = serde_json::to_value(&api).unwrap();
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_7");
    }

    #[test]
    fn parses_gateway_reliability_fields() {
        let body = json!({
            "choices": [{
                "message": {"content": "Hi there."},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 50, "completion_tokens": 10, "total_tokens": 60},
            "model": "gpt-3.5-turbo",
            "provider": "openai",
            "routing_reason": "cheapest healthy provider",
            "cost_usd": 0.001,
            "provider_latency_ms": 312,
            "attempt_count": 2,
            "failed_providers": ["groq"]
        });
        let resp = parse_gateway_body(&body).unwrap();
        assert_eq!(resp.content, "Hi there.");
        assert_eq!(resp.usage.total(), 60);
        assert_eq!(resp.cost_usd, 0.001);
        assert_eq!(resp.provider_used, "openai");
        assert_eq!(resp.attempt_count, 2);
        assert_eq!(resp.failed_providers, vec!["groq".to_string()]);
    }

    #[test]
    fn parses_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "t1",
                        "type": "function",
                        "function": {"name": "make_chart", "arguments": "{\"x\":[1,2]}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "model": "gpt-4o"
        });
        let resp = parse_gateway_body(&body).unwrap();
        assert!(resp.has_tool_calls());
        assert_eq!(resp.tool_calls[0].name, "make_chart");
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn missing_choices_is_provider_error() {
        let body = json!({"choices": [], "model": "m"});
        let err = parse_gateway_body(&body).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::ProviderError);
    }

    #[test]
    fn status_classification() {
        use crate::error::ErrorClass;
        let e = HttpRouterClient::classify_status(StatusCode::TOO_MANY_REQUESTS, None, "");
        assert_eq!(e.class(), ErrorClass::RateLimit);
        let e = HttpRouterClient::classify_status(StatusCode::BAD_GATEWAY, None, "");
        assert_eq!(e.class(), ErrorClass::ProviderUnavailable);
        let e = HttpRouterClient::classify_status(StatusCode::UNAUTHORIZED, None, "");
        assert_eq!(e.class(), ErrorClass::Unauthorized);
        let e = HttpRouterClient::classify_status(StatusCode::BAD_REQUEST, None, "filtered");
        assert_eq!(e.class(), ErrorClass::ProviderError);
    }
}
