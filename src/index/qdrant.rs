// ABOUTME: Qdrant-backed retrieval index over the REST API
// ABOUTME: Upserts, deletes by message ID, and runs similarity search with payload returns
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::embedding::GeminiEmbedder;
use super::{IndexHit, RetrievalIndex};
use crate::config::RetrievalConfig;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Option<Vec<ScoredPoint>>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: Option<PointPayload>,
}

#[derive(Debug, Deserialize)]
struct PointPayload {
    content: Option<String>,
}

/// Retrieval index over a Qdrant collection
///
/// Points carry the indexed text and its originating message ID as payload;
/// deletion filters on the message ID so a message's content can be withdrawn
/// when its threat flag is toggled off.
pub struct QdrantIndex {
    config: RetrievalConfig,
    embedder: GeminiEmbedder,
    client: Client,
}

impl QdrantIndex {
    /// Create an index over the configured collection
    #[must_use]
    pub fn new(config: RetrievalConfig, embedder: GeminiEmbedder) -> Self {
        Self {
            config,
            embedder,
            client: Client::new(),
        }
    }

    /// Create the collection if it does not exist yet
    ///
    /// # Errors
    ///
    /// Returns an error if the existence check or creation call fails
    pub async fn ensure_collection(&self) -> AppResult<()> {
        let url = format!(
            "{}/collections/{}",
            self.config.url, self.config.collection
        );

        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AppError::external_service("qdrant", format!("collection check failed: {e}")))?;

        if response.status().is_success() {
            return Ok(());
        }

        debug!(collection = %self.config.collection, "Creating retrieval collection");

        let body = json!({
            "vectors": {
                "size": self.config.vector_dim,
                "distance": "Cosine",
            }
        });

        let response = self
            .with_auth(self.client.put(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::external_service("qdrant", format!("collection create failed: {e}")))?;

        check_status("collection create", response).await?;
        Ok(())
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    fn points_url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}/points{}",
            self.config.url, self.config.collection, suffix
        )
    }
}

async fn check_status(operation: &str, response: reqwest::Response) -> AppResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_owned());
    Err(AppError::external_service(
        "qdrant",
        format!("{operation} failed ({status}): {body}"),
    ))
}

#[async_trait]
impl RetrievalIndex for QdrantIndex {
    #[instrument(skip(self, content))]
    async fn insert(&self, message_id: &str, content: &str) -> AppResult<()> {
        let vector = self.embedder.embed(content).await?;

        let body = json!({
            "points": [{
                "id": Uuid::new_v4().to_string(),
                "vector": vector,
                "payload": {
                    "message_id": message_id,
                    "content": content,
                }
            }]
        });

        let response = self
            .with_auth(self.client.put(&self.points_url("?wait=true")))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::external_service("qdrant", format!("upsert failed: {e}")))?;

        check_status("upsert", response).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, message_id: &str) -> AppResult<()> {
        let body = json!({
            "filter": {
                "must": [{
                    "key": "message_id",
                    "match": { "value": message_id }
                }]
            }
        });

        let response = self
            .with_auth(self.client.post(&self.points_url("/delete?wait=true")))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::external_service("qdrant", format!("delete failed: {e}")))?;

        check_status("delete", response).await
    }

    #[instrument(skip(self, query))]
    async fn search(&self, query: &str, top_k: usize) -> AppResult<Vec<IndexHit>> {
        let vector = self.embedder.embed(query).await?;

        let body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });

        let response = self
            .with_auth(self.client.post(&self.points_url("/search")))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::external_service("qdrant", format!("search failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_owned());
            return Err(AppError::external_service(
                "qdrant",
                format!("search failed ({status}): {text}"),
            ));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::external_service("qdrant", format!("invalid search response: {e}")))?;

        let hits = parsed
            .result
            .unwrap_or_default()
            .into_iter()
            .filter_map(|point| {
                point.payload.and_then(|p| p.content).map(|content| IndexHit {
                    score: point.score,
                    content,
                })
            })
            .collect();

        Ok(hits)
    }
}
