//! HTTP ingress: route construction and server bootstrap.

pub mod routes;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::{ExecError, ExecResult};

pub use routes::{AppState, GatewayState};

/// Build the service router.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/agents/:id/execute", post(routes::execute_agent))
        .route("/executions/:id", get(routes::get_execution))
        .route("/api/v1/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(addr: SocketAddr, state: GatewayState) -> ExecResult<()> {
    let app = build_router(state);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ExecError::Internal(format!("could not bind {addr}: {e}")))?;
    tracing::info!(%addr, "agentrelay listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| ExecError::Internal(format!("server error: {e}")))
}
