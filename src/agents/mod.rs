// ABOUTME: Capability interfaces for the adversary and protection agent roles
// ABOUTME: Defines fragment streaming, verdict parsing, and the persona registry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

//! # Agent Capability Interfaces
//!
//! The adversary and protection roles are polymorphism points expressed as
//! async traits; concrete backends are selected by name through the
//! [`AdversaryRegistry`]. The design mirrors a provider SPI: traits at the
//! seams, a registry for lookup, capability methods with explicit contracts.
//!
//! ## Key Concepts
//!
//! - **`AdversaryAgent`**: produces a lazy sequence of reply fragments
//! - **`ProtectionAgent`**: classifies an exchange and derives conversation
//!   titles
//! - **`Verdict`**: structured malicious/benign judgment with explanation
//! - **`FragmentStream`**: forward-only, single-consumer fragment stream

mod gemini;
pub mod personas;

pub use gemini::{default_adversaries, GeminiAdversary, GeminiProtection};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;

use crate::errors::{AppError, AppResult};

/// Lazy sequence of reply text fragments from an adversary agent
pub type FragmentStream = Pin<Box<dyn Stream<Item = AppResult<String>> + Send>>;

// ============================================================================
// Verdict
// ============================================================================

/// The protection agent's malicious/benign judgment
///
/// The boolean is authoritative; the explanation is explanatory only. A
/// benign verdict may carry an empty explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the classified message is malicious
    pub is_malicious: bool,
    /// Free-text reason, empty for benign verdicts
    #[serde(default, alias = "reason")]
    pub explanation: String,
}

impl Verdict {
    /// Parse a verdict from raw model output.
    ///
    /// Models wrap JSON in prose or code fences more often than not, so this
    /// extracts the first top-level JSON object before deserializing.
    ///
    /// # Errors
    ///
    /// Returns an internal error if no parseable JSON object is present.
    pub fn from_model_output(output: &str) -> AppResult<Self> {
        let start = output
            .find('{')
            .ok_or_else(|| AppError::internal("no JSON object in verdict output"))?;
        let end = output
            .rfind('}')
            .ok_or_else(|| AppError::internal("unterminated JSON object in verdict output"))?;

        serde_json::from_str(&output[start..=end])
            .map_err(|e| AppError::internal(format!("failed to parse verdict: {e}")))
    }
}

// ============================================================================
// Capability Traits
// ============================================================================

/// The simulated chat partner that generates (potentially malicious) replies
#[async_trait]
pub trait AdversaryAgent: Send + Sync {
    /// Persona name, also the `adversary_model` stored on messages
    fn name(&self) -> &str;

    /// Generate a lazy stream of reply fragments for the given user message
    /// and formatted conversation history
    ///
    /// # Errors
    ///
    /// Returns an error if the generation call cannot be started; errors
    /// mid-stream surface as stream items.
    async fn respond(&self, message: &str, history: &str) -> AppResult<FragmentStream>;

    /// Check whether the backing model is reachable
    ///
    /// # Errors
    ///
    /// Returns an error if the liveness probe itself fails
    async fn heartbeat(&self) -> AppResult<bool>;
}

/// The monitoring agent that screens exchanges for malicious content
#[async_trait]
pub trait ProtectionAgent: Send + Sync {
    /// Backend name recorded as part of the guard configuration
    fn name(&self) -> &str;

    /// Classify an adversary reply against the conversation transcript,
    /// optionally augmented with similar historical malicious content
    ///
    /// # Errors
    ///
    /// Returns an error if the classification call or verdict parsing fails
    async fn classify(
        &self,
        reply: &str,
        history: &str,
        retrieval_context: Option<&str>,
    ) -> AppResult<Verdict>;

    /// Derive a short conversation title from the opening message
    ///
    /// # Errors
    ///
    /// Returns an error if the generation call fails
    async fn generate_title(&self, seed: &str) -> AppResult<String>;

    /// Check whether the backing model is reachable
    ///
    /// # Errors
    ///
    /// Returns an error if the liveness probe itself fails
    async fn heartbeat(&self) -> AppResult<bool>;
}

// ============================================================================
// Adversary Registry
// ============================================================================

/// Lookup-by-name provider for persona-configured adversary agents
pub struct AdversaryRegistry {
    agents: Vec<Arc<dyn AdversaryAgent>>,
}

impl AdversaryRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self { agents: Vec::new() }
    }

    /// Register an adversary agent
    pub fn register(&mut self, agent: Arc<dyn AdversaryAgent>) {
        self.agents.push(agent);
    }

    /// Look up an adversary by persona name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AdversaryAgent>> {
        self.agents.iter().find(|a| a.name() == name).cloned()
    }

    /// Names of all registered personas
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name()).collect()
    }
}

impl Default for AdversaryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_parses_plain_json() {
        let verdict =
            Verdict::from_model_output(r#"{"is_malicious": true, "explanation": "phishing link"}"#)
                .expect("parse");
        assert!(verdict.is_malicious);
        assert_eq!(verdict.explanation, "phishing link");
    }

    #[test]
    fn test_verdict_parses_fenced_output_with_reason_alias() {
        let output = "```json\n{\"is_malicious\": false, \"reason\": \"\"}\n```";
        let verdict = Verdict::from_model_output(output).expect("parse");
        assert!(!verdict.is_malicious);
        assert!(verdict.explanation.is_empty());
    }

    #[test]
    fn test_verdict_defaults_missing_explanation_to_empty() {
        let verdict = Verdict::from_model_output(r#"{"is_malicious": false}"#).expect("parse");
        assert!(!verdict.is_malicious);
        assert!(verdict.explanation.is_empty());
    }

    #[test]
    fn test_verdict_rejects_non_json_output() {
        assert!(Verdict::from_model_output("the message looks fine").is_err());
    }
}
