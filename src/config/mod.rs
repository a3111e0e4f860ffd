// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Handles environment variables and runtime configuration parsing with defaults
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

//! Environment-based configuration for the simulation backend

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

use crate::errors::AppResult;

/// Default number of prior messages loaded as model context per turn
pub const DEFAULT_HISTORY_WINDOW: i64 = 20;

/// Default number of similar points fetched for retrieval augmentation
pub const DEFAULT_RETRIEVAL_TOP_K: usize = 10;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// SQLite database URL (e.g. `sqlite:decoychat.db` or `sqlite::memory:`)
    pub database_url: String,
    /// Bounded window of prior messages used as model context
    pub history_window: i64,
    /// Retrieval index configuration
    pub retrieval: RetrievalConfig,
    /// Agent backend configuration
    pub agents: AgentConfig,
}

/// Retrieval index (Qdrant) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Qdrant base URL
    pub url: String,
    /// Optional Qdrant API key
    pub api_key: Option<String>,
    /// Collection holding indexed malicious content
    pub collection: String,
    /// Embedding vector dimension
    pub vector_dim: usize,
    /// Number of similar points attached to a classification prompt
    pub top_k: usize,
}

/// LLM agent backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// API key for the Gemini backends (adversary, protection, embedding)
    pub gemini_api_key: Option<String>,
    /// Model used by adversary personas
    pub adversary_model: String,
    /// Model used by the protection agent
    pub protection_model: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Every setting has a development-friendly default except the Gemini API
    /// key, which is left unset (agent construction fails later with a config
    /// error if a Gemini backend is actually requested).
    ///
    /// # Errors
    ///
    /// Returns a config error if a numeric variable is set but unparseable.
    pub fn from_env() -> AppResult<Self> {
        let config = Self {
            database_url: env_var_or("DATABASE_URL", "sqlite:decoychat.db"),
            history_window: parse_env_or("HISTORY_WINDOW", DEFAULT_HISTORY_WINDOW)?,
            retrieval: RetrievalConfig {
                url: env_var_or("QDRANT_URL", "http://localhost:6333"),
                api_key: env::var("QDRANT_API_KEY").ok(),
                collection: env_var_or("QDRANT_COLLECTION", "malicious_messages"),
                vector_dim: parse_env_or("EMBEDDING_DIM", 768)?,
                top_k: parse_env_or("RETRIEVAL_TOP_K", DEFAULT_RETRIEVAL_TOP_K)?,
            },
            agents: AgentConfig {
                gemini_api_key: env::var("GEMINI_API_KEY").ok(),
                adversary_model: env_var_or("ADVERSARY_MODEL", "gemini-2.5-flash"),
                protection_model: env_var_or("PROTECTION_MODEL", "gemini-2.5-flash"),
            },
        };

        if config.agents.gemini_api_key.is_none() {
            warn!("GEMINI_API_KEY not set; Gemini-backed agents will be unavailable");
        }

        Ok(config)
    }
}

/// Read an environment variable with a fallback default
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse an environment variable, falling back to a default when unset
fn parse_env_or<T>(key: &str, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value.parse().map_err(|e| {
            crate::errors::AppError::config(format!("invalid value for {key}: {e}"))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Only assert fields no test environment is expected to override
        let config = ServerConfig::from_env().expect("defaults should parse");
        assert!(config.history_window > 0);
        assert!(config.retrieval.top_k > 0);
        assert!(!config.retrieval.collection.is_empty());
    }

    #[test]
    fn test_parse_env_or_uses_default_when_unset() {
        let parsed: i64 = parse_env_or("DECOYCHAT_TEST_UNSET_VAR", 42).expect("default");
        assert_eq!(parsed, 42);
    }
}
