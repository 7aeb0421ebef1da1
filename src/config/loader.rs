//! TOML configuration loading and env-var overrides.
//!
//! # Loading order
//! 1. Parse `~/.agentrelay/config.toml` (or the path in `AGENTRELAY_CONFIG`)
//! 2. Apply `AGENTRELAY_*` environment variable overrides
//! 3. Fall back to [`ServiceConfig::default()`] if the file is missing

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::error::{ExecError, ExecResult};

use super::schema::ServiceConfig;

// ─── default_config_path ─────────────────────────────────────────────────────

/// Return the default config file path: `~/.agentrelay/config.toml`.
pub fn default_config_path() -> ExecResult<PathBuf> {
    dirs::home_dir()
        .map(|h| h.join(".agentrelay").join("config.toml"))
        .ok_or_else(|| ExecError::Internal("could not determine home directory".to_string()))
}

// ─── load_config ─────────────────────────────────────────────────────────────

/// Load [`ServiceConfig`] from the given path, falling back to defaults if
/// the file does not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> ExecResult<ServiceConfig> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<ServiceConfig>(&content)
            .map_err(|e| ExecError::Internal(format!("failed to parse config at {path:?}: {e}")))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ServiceConfig::default(),
        Err(e) => {
            return Err(ExecError::Internal(format!(
                "failed to read config at {path:?}: {e}"
            )));
        }
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from the default path (or `AGENTRELAY_CONFIG`).
pub fn load_default_config() -> ServiceConfig {
    let path = env::var("AGENTRELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml"))
        });

    load_config(&path).unwrap_or_default()
}

// ─── apply_env_overrides ─────────────────────────────────────────────────────

/// Apply `AGENTRELAY_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `AGENTRELAY_PORT`             → `gateway.port`
/// - `AGENTRELAY_LLM_BASE_URL`     → `llm_gateway.base_url`
/// - `AGENTRELAY_LLM_API_KEY`      → `llm_gateway.api_key`
/// - `AGENTRELAY_VECTOR_BASE_URL`  → `retrieval.vector_base_url`
/// - `AGENTRELAY_CHUNK_BASE_URL`   → `retrieval.chunk_base_url`
/// - `AGENTRELAY_MCP_CONTEXT_URL`  → `mcp.default_context_url`
/// - `AGENTRELAY_DB_PATH`          → `database.path`
fn apply_env_overrides(config: &mut ServiceConfig) {
    if let Ok(v) = env::var("AGENTRELAY_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        config.gateway.port = port;
    }
    if let Ok(v) = env::var("AGENTRELAY_LLM_BASE_URL") {
        config.llm_gateway.base_url = v;
    }
    if let Ok(v) = env::var("AGENTRELAY_LLM_API_KEY") {
        config.llm_gateway.api_key = v;
    }
    if let Ok(v) = env::var("AGENTRELAY_VECTOR_BASE_URL") {
        config.retrieval.vector_base_url = v;
    }
    if let Ok(v) = env::var("AGENTRELAY_CHUNK_BASE_URL") {
        config.retrieval.chunk_base_url = v;
    }
    if let Ok(v) = env::var("AGENTRELAY_MCP_CONTEXT_URL") {
        config.mcp.default_context_url = v;
    }
    if let Ok(v) = env::var("AGENTRELAY_DB_PATH") {
        config.database.path = v;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
