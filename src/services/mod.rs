// ABOUTME: Service layer wiring the persistence gateway, agents, and index together
// ABOUTME: Hosts the turn orchestrator, conversation operations, and agent health probes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

//! # Service Layer
//!
//! Business logic above the persistence gateway and the agent/index
//! collaborators. [`turn`] owns the message-turn pipeline; [`conversations`]
//! owns the conversation-level operations and access control.

pub mod conversations;
pub mod turn;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agents::{AdversaryRegistry, ProtectionAgent};
use crate::errors::{AppError, AppResult};

/// Liveness of the agent pair serving a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsHealth {
    /// Persona name the adversary probe ran against
    pub adversary: String,
    /// Whether the adversary's backing model answered
    pub adversary_alive: bool,
    /// Whether the protection agent's backing model answered
    pub protection_alive: bool,
}

/// Probe the selected adversary and the protection agent for liveness
///
/// A probe that itself errors counts as not alive; the error is logged, not
/// propagated, so one dead backend does not mask the other's status.
///
/// # Errors
///
/// Returns `ResourceNotFound` if no adversary is registered under the name.
pub async fn agents_heartbeat(
    adversaries: &AdversaryRegistry,
    protection: &Arc<dyn ProtectionAgent>,
    adversary_name: &str,
) -> AppResult<AgentsHealth> {
    let adversary = adversaries
        .get(adversary_name)
        .ok_or_else(|| AppError::not_found("adversary agent"))?;

    let adversary_alive = match adversary.heartbeat().await {
        Ok(alive) => alive,
        Err(error) => {
            warn!(agent = adversary_name, %error, "Adversary heartbeat failed");
            false
        }
    };

    let protection_alive = match protection.heartbeat().await {
        Ok(alive) => alive,
        Err(error) => {
            warn!(agent = protection.name(), %error, "Protection heartbeat failed");
            false
        }
    };

    Ok(AgentsHealth {
        adversary: adversary_name.to_owned(),
        adversary_alive,
        protection_alive,
    })
}
