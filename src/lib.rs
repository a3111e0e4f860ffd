// ABOUTME: Main library entry point for the decoychat simulation backend
// ABOUTME: Wires the turn orchestrator, agent interfaces, persistence, and retrieval index
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

#![deny(unsafe_code)]

//! # Decoychat
//!
//! A conversational backend that pairs a user with a simulated "adversary"
//! persona (an LLM chat partner) while a "protection" agent screens each
//! exchange for malicious content. Confirmed-malicious replies are indexed
//! into a semantic retrieval store so later classifications can be augmented
//! with similar historical content.
//!
//! The crate is transport-agnostic: the turn orchestrator exposes a typed
//! event stream and the caller owns the wire framing (SSE, NDJSON, ...).
//!
//! ## Architecture
//!
//! - **`agents`**: capability traits for the adversary and protection roles,
//!   plus the Gemini-backed implementations and persona registry
//! - **`database`**: SQLite persistence for conversations, messages, and
//!   threat indicators
//! - **`index`**: retrieval index trait and the Qdrant REST implementation
//! - **`services`**: the turn orchestration pipeline and conversation-level
//!   operations (access control, threat toggling)
//! - **`history`**: pure formatting of a message window into model context
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use decoychat::config::ServerConfig;
//! use decoychat::database::ChatStore;
//! use decoychat::errors::AppResult;
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     decoychat::logging::init();
//!     let config = ServerConfig::from_env()?;
//!     let store = Arc::new(ChatStore::connect(&config.database_url).await?);
//!     println!("store ready, history window = {}", config.history_window);
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod config;
pub mod database;
pub mod errors;
pub mod history;
pub mod index;
pub mod logging;
pub mod services;

pub use errors::{AppError, AppResult, ErrorCode};
pub use services::turn::{NewTurn, TurnEvent, TurnOrchestrator, TurnStream};
