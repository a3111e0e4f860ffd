// ABOUTME: Gemini-backed adversary and protection agent implementations
// ABOUTME: Streams adversary replies over SSE and classifies exchanges via generateContent
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

//! # Gemini Agent Backends
//!
//! Implementations of [`AdversaryAgent`] and [`ProtectionAgent`] over
//! Google's Generative Language API. Set the `GEMINI_API_KEY` environment
//! variable or pass the key explicitly.

use std::env;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use super::personas::{self, Persona};
use super::{AdversaryAgent, AdversaryRegistry, FragmentStream, ProtectionAgent, Verdict};
use crate::errors::{AppError, AppResult, ErrorCode};

/// Environment variable for the Gemini API key
const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Default model for both agent roles
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Base URL for the Gemini API
const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ============================================================================
// API Request/Response Types
// ============================================================================

/// Gemini API request structure
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

/// Content structure for the Gemini API
#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<TextPart>,
}

/// Text part of a content block
#[derive(Debug, Serialize, Deserialize)]
struct TextPart {
    text: String,
}

/// Generation configuration
#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

/// Gemini API response structure
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<GeminiError>,
}

/// Response candidate
#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

/// API error response from Gemini
#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

// ============================================================================
// Shared Client
// ============================================================================

/// Shared HTTP plumbing for both agent roles
#[derive(Clone)]
struct GeminiClient {
    api_key: String,
    model: String,
    client: Client,
}

impl GeminiClient {
    fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            client: Client::new(),
        }
    }

    fn from_env(model: impl Into<String>) -> AppResult<Self> {
        let api_key = env::var(GEMINI_API_KEY_ENV).map_err(|_| {
            AppError::config(format!("{GEMINI_API_KEY_ENV} environment variable not set"))
        })?;
        Ok(Self::new(api_key, model))
    }

    /// Build the API URL for a method on the configured model
    fn build_url(&self, method: &str) -> String {
        format!(
            "{API_BASE_URL}/models/{model}:{method}?key={key}",
            model = self.model,
            key = self.api_key
        )
    }

    /// Non-streaming completion returning the first candidate's text
    async fn generate(&self, request: &GeminiRequest) -> AppResult<String> {
        let response = self
            .client
            .post(self.build_url("generateContent"))
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::internal(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| AppError::internal(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            error!(status = %status, "Gemini API error");
            return Err(map_api_error(status.as_u16(), &response_text));
        }

        let gemini_response: GeminiResponse =
            serde_json::from_str(&response_text).map_err(|e| {
                error!(error = %e, "Failed to parse Gemini response");
                AppError::internal(format!("Failed to parse Gemini response: {e}"))
            })?;

        if let Some(error) = gemini_response.error {
            return Err(AppError::internal(format!(
                "Gemini API error: {}",
                error.message
            )));
        }

        extract_text(&gemini_response)
    }

    /// Streaming completion yielding text deltas as they arrive
    async fn generate_stream(&self, request: &GeminiRequest) -> AppResult<FragmentStream> {
        let response = self
            .client
            .post(self.build_url("streamGenerateContent"))
            .query(&[("alt", "sse")])
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::internal(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_owned());
            return Err(map_api_error(status.as_u16(), &error_text));
        }

        let byte_stream = response.bytes_stream();

        let stream = byte_stream.filter_map(|result| async move {
            match result {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);

                    // SSE framing: payload lines are prefixed with "data: "
                    for line in text.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data.trim().is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<GeminiResponse>(data) {
                            Ok(chunk) => {
                                let delta = chunk
                                    .candidates
                                    .as_ref()
                                    .and_then(|c| c.first())
                                    .and_then(|c| c.content.as_ref())
                                    .and_then(|c| c.parts.first())
                                    .map(|p| p.text.clone());
                                if let Some(delta) = delta {
                                    return Some(Ok(delta));
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Failed to parse streaming chunk");
                            }
                        }
                    }

                    None
                }
                Err(e) => Some(Err(AppError::internal(format!("Stream error: {e}")))),
            }
        });

        Ok(Box::pin(stream) as FragmentStream)
    }

    /// Probe the API key by listing models
    async fn heartbeat(&self) -> AppResult<bool> {
        let url = format!("{API_BASE_URL}/models?key={}", self.api_key);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::internal(format!("Health check failed: {e}")))?;

        Ok(response.status().is_success())
    }
}

/// Extract text content from a Gemini response
fn extract_text(response: &GeminiResponse) -> AppResult<String> {
    response
        .candidates
        .as_ref()
        .and_then(|c| c.first())
        .and_then(|c| c.content.as_ref())
        .and_then(|c| c.parts.first())
        .map(|p| p.text.clone())
        .ok_or_else(|| AppError::internal("No content in Gemini response"))
}

/// Map API error status to an appropriate error type
fn map_api_error(status: u16, response_text: &str) -> AppError {
    let message = serde_json::from_str::<GeminiResponse>(response_text)
        .ok()
        .and_then(|r| r.error)
        .map_or_else(|| response_text.to_owned(), |e| e.message);

    match status {
        429 => AppError::new(
            ErrorCode::ExternalRateLimited,
            "AI service quota exceeded. Please wait a moment and try again.",
        ),
        _ => AppError::external_service("gemini", format!("API error ({status}): {message}")),
    }
}

// ============================================================================
// Adversary Agent
// ============================================================================

/// Gemini-backed adversary persona
pub struct GeminiAdversary {
    persona: Persona,
    client: GeminiClient,
}

impl GeminiAdversary {
    /// Create an adversary with an explicit API key
    #[must_use]
    pub fn new(persona: Persona, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            persona,
            client: GeminiClient::new(api_key, model),
        }
    }

    /// Create an adversary from the `GEMINI_API_KEY` environment variable
    ///
    /// # Errors
    ///
    /// Returns a config error if the environment variable is not set.
    pub fn from_env(persona: Persona) -> AppResult<Self> {
        Ok(Self {
            persona,
            client: GeminiClient::from_env(DEFAULT_MODEL)?,
        })
    }
}

#[async_trait]
impl AdversaryAgent for GeminiAdversary {
    fn name(&self) -> &str {
        self.persona.name
    }

    #[instrument(skip(self, message, history), fields(persona = self.persona.name))]
    async fn respond(&self, message: &str, history: &str) -> AppResult<FragmentStream> {
        debug!("Starting adversary streaming request");

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_owned()),
                parts: vec![TextPart {
                    text: personas::attack_turn_prompt(history, message),
                }],
            }],
            system_instruction: Some(GeminiContent {
                role: None,
                parts: vec![TextPart {
                    text: personas::attack_system_prompt(&self.persona),
                }],
            }),
            generation_config: Some(GenerationConfig {
                temperature: Some(0.9),
                max_output_tokens: None,
            }),
        };

        self.client.generate_stream(&request).await
    }

    async fn heartbeat(&self) -> AppResult<bool> {
        self.client.heartbeat().await
    }
}

// ============================================================================
// Protection Agent
// ============================================================================

/// Gemini-backed protection agent
pub struct GeminiProtection {
    client: GeminiClient,
}

impl GeminiProtection {
    /// Create a protection agent with an explicit API key
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: GeminiClient::new(api_key, model),
        }
    }

    /// Create a protection agent from the `GEMINI_API_KEY` environment variable
    ///
    /// # Errors
    ///
    /// Returns a config error if the environment variable is not set.
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            client: GeminiClient::from_env(DEFAULT_MODEL)?,
        })
    }
}

#[async_trait]
impl ProtectionAgent for GeminiProtection {
    fn name(&self) -> &str {
        "gemini"
    }

    #[instrument(skip_all, fields(augmented = retrieval_context.is_some()))]
    async fn classify(
        &self,
        reply: &str,
        history: &str,
        retrieval_context: Option<&str>,
    ) -> AppResult<Verdict> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_owned()),
                parts: vec![TextPart {
                    text: personas::protection_prompt(history, reply, retrieval_context),
                }],
            }],
            system_instruction: None,
            // Low temperature: classification should be deterministic-ish
            generation_config: Some(GenerationConfig {
                temperature: Some(0.1),
                max_output_tokens: None,
            }),
        };

        let output = self.client.generate(&request).await?;
        Verdict::from_model_output(&output)
    }

    #[instrument(skip_all)]
    async fn generate_title(&self, seed: &str) -> AppResult<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_owned()),
                parts: vec![TextPart {
                    text: personas::title_prompt(seed),
                }],
            }],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                temperature: Some(0.4),
                max_output_tokens: Some(32),
            }),
        };

        let output = self.client.generate(&request).await?;
        Ok(output.trim().trim_matches('"').to_owned())
    }

    async fn heartbeat(&self) -> AppResult<bool> {
        self.client.heartbeat().await
    }
}

// ============================================================================
// Registry Construction
// ============================================================================

/// Build a registry with all built-in personas over the Gemini backend
#[must_use]
pub fn default_adversaries(api_key: &str, model: &str) -> AdversaryRegistry {
    let mut registry = AdversaryRegistry::new();
    for persona in personas::BUILTIN_PERSONAS {
        registry.register(Arc::new(GeminiAdversary::new(*persona, api_key, model)));
    }
    registry
}

impl Debug for GeminiAdversary {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GeminiAdversary")
            .field("persona", &self.persona.name)
            .field("model", &self.client.model)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl Debug for GeminiProtection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GeminiProtection")
            .field("model", &self.client.model)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_adversaries_registers_builtin_personas() {
        let registry = default_adversaries("test-key", DEFAULT_MODEL);
        assert!(registry.get("julia").is_some());
        assert!(registry.get("victor").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let agent = GeminiProtection::new("secret-key", DEFAULT_MODEL);
        let rendered = format!("{agent:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
