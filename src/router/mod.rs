//! LLM gateway access: wire types, the single-attempt HTTP client, and the
//! reliability policy engine that wraps it.

pub mod client;
pub mod reliability;
pub mod types;

pub use client::{HttpRouterClient, Router, RouterClientConfig};
pub use reliability::{
    Backoff, CallOutcome, CancelFlag, FallbackConfig, PolicyFailure, ProviderCatalog,
    ProviderInfo, ReliabilityTelemetry, ReliableRouter, RetryConfig,
};
pub use types::{
    FinishReason, Message, MessageRole, OptimizeFor, RouterRequest, RouterResponse, TokenUsage,
    ToolCall, ToolChoice, ToolDescriptor,
};
