//! HTTP handlers for the execution service.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{ErrorClass, ExecError};
use crate::execution::{ExecutionRecorder, ExecutionRequest, HistoryMessage, Orchestrator};

/// Shared handler state.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub recorder: Arc<dyn ExecutionRecorder>,
}

pub type GatewayState = Arc<AppState>;

// ─── Health ──────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "agentrelay" }))
}

// ─── Execute ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    pub input: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    #[serde(default)]
    pub notebook_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub selected_documents: Option<Vec<Uuid>>,
    #[serde(default)]
    pub disable_knowledge: bool,
    /// Tenant scope for internal/system-agent invocation.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// Pull the bearer token out of the `Authorization` header, if any.
pub(crate) fn bearer_token(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `POST /agents/{id}/execute`
pub async fn execute_agent(
    State(state): State<GatewayState>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ExecuteBody>,
) -> impl IntoResponse {
    let Some(user_id) = header_value(&headers, "x-user-id") else {
        return error_response(&ExecError::Unauthorized("missing identity".to_string()));
    };
    let tenant_id = body
        .tenant_id
        .clone()
        .or_else(|| header_value(&headers, "x-tenant-id"))
        .unwrap_or_default();

    let request = ExecutionRequest {
        agent_id,
        user_id,
        tenant_id,
        session_id: body.session_id,
        input: body.input,
        history: body.history,
        notebook_ids_override: body.notebook_ids,
        selected_documents: body.selected_documents,
        disable_knowledge: body.disable_knowledge,
        auth_token: bearer_token(&headers),
    };

    match state.orchestrator.execute(request).await {
        Ok(response) => (StatusCode::OK, Json(json!(response))).into_response(),
        Err(e) => error_response(&e),
    }
}

// ─── Record lookup ───────────────────────────────────────────────────────────

/// `GET /executions/{id}`
pub async fn get_execution(
    State(state): State<GatewayState>,
    Path(execution_id): Path<String>,
) -> impl IntoResponse {
    match state.recorder.get(&execution_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(json!(record))).into_response(),
        Ok(None) => error_response(&ExecError::NotFound(format!(
            "execution '{execution_id}'"
        ))),
        Err(e) => error_response(&e),
    }
}

// ─── Error mapping ───────────────────────────────────────────────────────────

pub(crate) fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Validation => StatusCode::BAD_REQUEST,
        ErrorClass::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: &ExecError) -> axum::response::Response {
    let status = status_for(e.class());
    let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
        json!({ "error": "Execution failed", "details": e.public_message() })
    } else {
        json!({ "error": e.public_message() })
    };
    (status, Json(body)).into_response()
}
