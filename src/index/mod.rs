// ABOUTME: Retrieval index abstraction over the malicious-content vector store
// ABOUTME: Defines the capability trait plus the embedding and Qdrant backends
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

//! # Malicious Content Retrieval Index
//!
//! Content judged malicious by the protection agent is embedded and stored in
//! a vector collection keyed by the originating message ID. On later turns the
//! index is searched for content similar to the incoming adversary reply and
//! the hits are attached to the classification prompt as extra context.
//!
//! The index is best-effort infrastructure: the orchestrator treats its
//! failures as degraded operation, not turn failure.

mod embedding;
mod qdrant;

pub use embedding::GeminiEmbedder;
pub use qdrant::QdrantIndex;

use async_trait::async_trait;

use crate::errors::AppResult;

/// A single similarity hit from the index
#[derive(Debug, Clone)]
pub struct IndexHit {
    /// Similarity score, higher is closer
    pub score: f32,
    /// The indexed content
    pub content: String,
}

/// Vector store of content previously judged malicious
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    /// Index a piece of malicious content under its originating message ID
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the store write fails
    async fn insert(&self, message_id: &str, content: &str) -> AppResult<()>;

    /// Remove all points indexed under the given message ID
    ///
    /// Removing a message that was never indexed is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails
    async fn delete(&self, message_id: &str) -> AppResult<()>;

    /// Find content similar to the query, best matches first
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the store query fails
    async fn search(&self, query: &str, top_k: usize) -> AppResult<Vec<IndexHit>>;
}

/// Render similarity hits into the context block attached to classification
/// prompts, or `None` when there are no hits
#[must_use]
pub fn format_hits(hits: &[IndexHit]) -> Option<String> {
    if hits.is_empty() {
        return None;
    }

    let mut block = String::from("SIMILAR MESSAGES WITH SIMILARITY SCORE:\n");
    for (i, hit) in hits.iter().enumerate() {
        block.push_str(&format!(
            "{n}. {content}\nSimilarity score: {score}\n\n",
            n = i + 1,
            content = hit.content,
            score = hit.score,
        ));
    }
    Some(block)
}
