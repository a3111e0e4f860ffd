// ABOUTME: Text embedding client over the Gemini embedContent endpoint
// ABOUTME: Turns message text into fixed-dimension vectors for the retrieval index
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

use std::fmt::{Debug, Formatter, Result as FmtResult};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::{AppError, AppResult};

/// Default embedding model
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

/// Base URL for the Gemini API
const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Serialize)]
struct EmbedRequest {
    content: EmbedContent,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<Embedding>,
}

#[derive(Debug, Deserialize)]
struct Embedding {
    values: Vec<f32>,
}

/// Gemini-backed text embedder
#[derive(Clone)]
pub struct GeminiEmbedder {
    api_key: String,
    model: String,
    client: Client,
}

impl GeminiEmbedder {
    /// Create an embedder with an explicit API key and the default model
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_EMBEDDING_MODEL.to_owned(),
            client: Client::new(),
        }
    }

    /// Override the embedding model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Embed a piece of text into a vector
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails or returns no embedding
    pub async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let url = format!(
            "{API_BASE_URL}/models/{model}:embedContent?key={key}",
            model = self.model,
            key = self.api_key
        );

        let request = EmbedRequest {
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_owned(),
                }],
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::external_service("gemini", format!("embed request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_owned());
            error!(status = %status, "Embedding API error");
            return Err(AppError::external_service(
                "gemini",
                format!("embed API error ({status}): {body}"),
            ));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AppError::external_service("gemini", format!("invalid embed response: {e}")))?;

        parsed
            .embedding
            .map(|e| e.values)
            .ok_or_else(|| AppError::external_service("gemini", "no embedding in response"))
    }
}

impl Debug for GeminiEmbedder {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GeminiEmbedder")
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}
