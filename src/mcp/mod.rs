//! MCP (Model Context Protocol) over HTTP: list tools, invoke tools.

pub mod client;

pub use client::{HttpMcpClient, McpClient, McpToolDescriptor, McpToolOutcome};
