//! Service configuration: TOML schema, loader, and env overrides.

pub mod loader;
pub mod schema;

pub use loader::{default_config_path, load_config, load_default_config};
pub use schema::{
    DatabaseConfig, GatewayConfig, LlmGatewayConfig, McpConfig, MemoryConfig, ProviderEntry,
    RetrievalConfig, ServiceConfig,
};
