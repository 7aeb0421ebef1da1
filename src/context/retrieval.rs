//! HTTP clients for the retrieval collaborators: vector search and the
//! chunk corpus.
//!
//! Both collaborators are tenant-scoped and authenticated with the caller's
//! bearer token, which is request-scoped and therefore travels inside each
//! query rather than in the client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ExecError, ExecResult};

/// Default per-retrieval timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Vector search ───────────────────────────────────────────────────────────

/// A similarity query against the vector index.
#[derive(Debug, Clone, Serialize)]
pub struct VectorQuery {
    pub query_text: String,
    pub notebook_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<Uuid>>,
    pub tenant_id: String,
    pub top_k: usize,
    pub min_score: f32,
    #[serde(skip)]
    pub auth_token: String,
}

/// One vector-search hit.
#[derive(Debug, Clone, Deserialize)]
pub struct VectorHit {
    pub chunk_id: String,
    pub document_id: String,
    /// Display name; collaborators that don't resolve names omit it.
    #[serde(default)]
    pub document_name: Option<String>,
    pub content: String,
    pub score: f32,
    #[serde(default)]
    pub chunk_number: u32,
    #[serde(default)]
    pub is_summary: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorSearchResult {
    pub results: Vec<VectorHit>,
    #[serde(default)]
    pub query_time_ms: u64,
}

/// Similarity retrieval seam.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Returns hits ranked by similarity, descending.
    async fn search(&self, query: &VectorQuery) -> ExecResult<VectorSearchResult>;
}

/// HTTP vector-search client.
pub struct HttpVectorSearch {
    client: Client,
    base_url: String,
}

impl HttpVectorSearch {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ExecResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn with_default_timeout(base_url: impl Into<String>) -> ExecResult<Self> {
        Self::new(base_url, DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl VectorSearch for HttpVectorSearch {
    async fn search(&self, query: &VectorQuery) -> ExecResult<VectorSearchResult> {
        let response = self
            .client
            .post(format!("{}/search/vector", self.base_url))
            .bearer_auth(&query.auth_token)
            .json(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecError::Timeout {
                        scope: "vector search".to_string(),
                        after: DEFAULT_TIMEOUT,
                    }
                } else {
                    ExecError::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecError::Connection(format!(
                "vector search returned {status}"
            )));
        }

        response
            .json::<VectorSearchResult>()
            .await
            .map_err(|e| ExecError::Connection(format!("malformed vector search response: {e}")))
    }
}

// ─── Chunk corpus ────────────────────────────────────────────────────────────

/// A corpus query for full-document retrieval, ordered by `chunk_number`.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkQuery {
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notebook_ids: Option<Vec<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_ids: Option<Vec<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    pub order_by: &'static str,
    #[serde(skip)]
    pub auth_token: String,
}

impl ChunkQuery {
    pub fn for_notebooks(
        tenant_id: impl Into<String>,
        notebook_ids: Vec<Uuid>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            notebook_ids: Some(notebook_ids),
            file_ids: None,
            limit: None,
            offset: None,
            order_by: "chunk_number",
            auth_token: auth_token.into(),
        }
    }
}

/// One stored chunk in insertion order.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    pub chunk_number: u32,
    pub content: String,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub is_summary: bool,
}

#[derive(Debug, Deserialize)]
struct ChunkListResponse {
    chunks: Vec<StoredChunk>,
}

/// Chunk corpus seam.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Fetch chunks in `chunk_number` ascending order.
    async fn fetch(&self, query: &ChunkQuery) -> ExecResult<Vec<StoredChunk>>;
}

/// HTTP chunk-corpus client.
pub struct HttpChunkStore {
    client: Client,
    base_url: String,
}

impl HttpChunkStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ExecResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn with_default_timeout(base_url: impl Into<String>) -> ExecResult<Self> {
        Self::new(base_url, DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl ChunkStore for HttpChunkStore {
    async fn fetch(&self, query: &ChunkQuery) -> ExecResult<Vec<StoredChunk>> {
        let response = self
            .client
            .post(format!("{}/chunks/list", self.base_url))
            .bearer_auth(&query.auth_token)
            .json(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecError::Timeout {
                        scope: "chunk retrieval".to_string(),
                        after: DEFAULT_TIMEOUT,
                    }
                } else {
                    ExecError::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecError::Connection(format!(
                "chunk retrieval returned {status}"
            )));
        }

        let mut list = response
            .json::<ChunkListResponse>()
            .await
            .map_err(|e| ExecError::Connection(format!("malformed chunk response: {e}")))?;

        // The collaborator orders by chunk_number; enforce it regardless.
        list.chunks.sort_by_key(|c| c.chunk_number);
        Ok(list.chunks)
    }
}
