// ABOUTME: Shared test fixtures for the integration suite
// ABOUTME: Scripted agents, a recording index, in-memory store setup, and stream helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use futures_util::StreamExt;

use decoychat::agents::{
    AdversaryAgent, AdversaryRegistry, FragmentStream, ProtectionAgent, Verdict,
};
use decoychat::database::ChatStore;
use decoychat::errors::{AppError, AppResult};
use decoychat::index::{IndexHit, RetrievalIndex};
use decoychat::services::turn::{NewTurn, TurnEvent, TurnOrchestrator, TurnStream};

static INIT_LOGGING: Once = Once::new();

/// Initialize tracing once for the whole test binary
pub fn init_logging() {
    INIT_LOGGING.call_once(decoychat::logging::init);
}

/// Fresh in-memory store with the schema applied
pub async fn memory_store() -> Arc<ChatStore> {
    init_logging();
    Arc::new(
        ChatStore::connect("sqlite::memory:")
            .await
            .expect("in-memory store"),
    )
}

// ============================================================================
// Scripted Adversary
// ============================================================================

/// Adversary that replays a fixed fragment script
pub struct ScriptedAdversary {
    persona: String,
    fragments: Vec<String>,
}

impl ScriptedAdversary {
    pub fn new(persona: &str, fragments: &[&str]) -> Self {
        Self {
            persona: persona.to_owned(),
            fragments: fragments.iter().map(|f| (*f).to_owned()).collect(),
        }
    }
}

#[async_trait]
impl AdversaryAgent for ScriptedAdversary {
    fn name(&self) -> &str {
        &self.persona
    }

    async fn respond(&self, _message: &str, _history: &str) -> AppResult<FragmentStream> {
        let fragments = self.fragments.clone();
        let stream = futures_util::stream::iter(fragments.into_iter().map(Ok));
        Ok(Box::pin(stream) as FragmentStream)
    }

    async fn heartbeat(&self) -> AppResult<bool> {
        Ok(true)
    }
}

// ============================================================================
// Scripted Protection
// ============================================================================

/// Arguments the protection agent was called with, recorded per call
#[derive(Debug, Clone)]
pub struct ClassifyCall {
    pub reply: String,
    pub history: String,
    pub retrieval_context: Option<String>,
}

/// Protection agent that returns a fixed verdict and records its calls
pub struct ScriptedProtection {
    verdict: Verdict,
    title: String,
    fail_classify: bool,
    pub calls: Mutex<Vec<ClassifyCall>>,
}

impl ScriptedProtection {
    pub fn malicious(explanation: &str) -> Self {
        Self::with_verdict(Verdict {
            is_malicious: true,
            explanation: explanation.to_owned(),
        })
    }

    pub fn benign() -> Self {
        Self::with_verdict(Verdict {
            is_malicious: false,
            explanation: String::new(),
        })
    }

    /// A backend whose classification calls always fail
    pub fn classify_fails() -> Self {
        let mut agent = Self::benign();
        agent.fail_classify = true;
        agent
    }

    fn with_verdict(verdict: Verdict) -> Self {
        Self {
            verdict,
            title: "Scripted title".to_owned(),
            fail_classify: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn classify_calls(&self) -> Vec<ClassifyCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ProtectionAgent for ScriptedProtection {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn classify(
        &self,
        reply: &str,
        history: &str,
        retrieval_context: Option<&str>,
    ) -> AppResult<Verdict> {
        if self.fail_classify {
            return Err(AppError::external_service(
                "scripted",
                "classification backend down",
            ));
        }
        self.calls.lock().expect("calls lock").push(ClassifyCall {
            reply: reply.to_owned(),
            history: history.to_owned(),
            retrieval_context: retrieval_context.map(ToOwned::to_owned),
        });
        Ok(self.verdict.clone())
    }

    async fn generate_title(&self, _seed: &str) -> AppResult<String> {
        Ok(self.title.clone())
    }

    async fn heartbeat(&self) -> AppResult<bool> {
        Ok(true)
    }
}

// ============================================================================
// Recording Index
// ============================================================================

/// Operations observed by the recording index, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOp {
    Insert { message_id: String, content: String },
    Delete { message_id: String },
    Search { query: String },
}

/// In-memory index that records every operation and serves scripted hits
#[derive(Default)]
pub struct RecordingIndex {
    hits: Vec<IndexHit>,
    ops: Mutex<Vec<IndexOp>>,
}

impl RecordingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(hits: Vec<IndexHit>) -> Self {
        Self {
            hits,
            ops: Mutex::new(Vec::new()),
        }
    }

    pub fn ops(&self) -> Vec<IndexOp> {
        self.ops.lock().expect("ops lock").clone()
    }

    pub fn inserts(&self) -> Vec<IndexOp> {
        self.ops()
            .into_iter()
            .filter(|op| matches!(op, IndexOp::Insert { .. }))
            .collect()
    }
}

#[async_trait]
impl RetrievalIndex for RecordingIndex {
    async fn insert(&self, message_id: &str, content: &str) -> AppResult<()> {
        self.ops.lock().expect("ops lock").push(IndexOp::Insert {
            message_id: message_id.to_owned(),
            content: content.to_owned(),
        });
        Ok(())
    }

    async fn delete(&self, message_id: &str) -> AppResult<()> {
        self.ops.lock().expect("ops lock").push(IndexOp::Delete {
            message_id: message_id.to_owned(),
        });
        Ok(())
    }

    async fn search(&self, query: &str, _top_k: usize) -> AppResult<Vec<IndexHit>> {
        self.ops.lock().expect("ops lock").push(IndexOp::Search {
            query: query.to_owned(),
        });
        Ok(self.hits.clone())
    }
}

// ============================================================================
// Orchestrator Wiring
// ============================================================================

pub const HISTORY_WINDOW: i64 = 20;
pub const RETRIEVAL_K: usize = 10;

/// Wire an orchestrator over scripted collaborators
pub fn orchestrator(
    store: Arc<ChatStore>,
    adversary: ScriptedAdversary,
    protection: Arc<ScriptedProtection>,
    index: Arc<RecordingIndex>,
) -> TurnOrchestrator {
    let mut registry = AdversaryRegistry::new();
    registry.register(Arc::new(adversary));

    TurnOrchestrator::new(
        store,
        Arc::new(registry),
        protection,
        index,
        HISTORY_WINDOW,
        RETRIEVAL_K,
    )
}

/// Drain a turn stream into a vector of events, panicking on any error item
pub async fn collect_events(mut stream: TurnStream) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        events.push(item.expect("turn event"));
    }
    events
}

/// Compact tag for asserting event order
pub fn event_tag(event: &TurnEvent) -> &'static str {
    match event {
        TurnEvent::AiResponse(_) => "ai-response",
        TurnEvent::UserMsg(_) => "user-msg",
        TurnEvent::AiMsg(_) => "ai-msg",
        TurnEvent::NewConversation(_) => "new-conversation",
        TurnEvent::MaliciousVerdict(_) => "malicious-verdict",
    }
}

/// A default turn against the given conversation
pub fn turn(conversation_id: &str, adversary: &str, use_retrieval: bool) -> NewTurn {
    NewTurn {
        conversation_id: conversation_id.to_owned(),
        content: "hello there".to_owned(),
        image_url: None,
        adversary: adversary.to_owned(),
        use_retrieval,
    }
}
