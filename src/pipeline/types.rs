//! Shared types for the inbound pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channels::Channel;
use crate::error::PipelineError;
use crate::matcher::MatchStrategy;
use crate::parsers::InboundEvent;
use crate::safety::{GuardDecision, SuppressReason};
use crate::store::MemoryEntry;
use crate::tools::ToolResult;

// ── Responder ───────────────────────────────────────────────────────

/// A tool invocation requested by the responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// Decides what to do with an allowed inbound event.
///
/// Gets the event and the conversation history (oldest first, including
/// the entry just stored for this event) and returns tool calls to run in
/// order. An empty list means no action.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, event: &InboundEvent, history: &[MemoryEntry]) -> Result<Vec<ToolCall>, PipelineError>;
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Final status of one inbound webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// At least one message was sent.
    Replied,
    Suppressed { reason: SuppressReason },
    /// Allowed, but nothing was sent.
    NoAction,
    /// The payload could not be parsed.
    Rejected { reason: String },
    Failed { reason: String },
}

impl OutcomeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Replied => "replied",
            Self::Suppressed { .. } => "suppressed",
            Self::NoAction => "no_action",
            Self::Rejected { .. } => "rejected",
            Self::Failed { .. } => "failed",
        }
    }
}

/// A tool call and what it returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub name: String,
    pub result: ToolResult,
}

/// Everything the processor decided about one inbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundOutcome {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub is_new_conversation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_by: Option<MatchStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<GuardDecision>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolInvocation>,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl InboundOutcome {
    /// Outcome for a payload that never became an event.
    pub fn rejected(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            channel: None,
            event_id: None,
            conversation_id: None,
            is_new_conversation: false,
            matched_by: None,
            decision: None,
            tool_results: Vec::new(),
            status: OutcomeStatus::Rejected { reason: reason.into() },
        }
    }

    pub fn is_replied(&self) -> bool {
        self.status == OutcomeStatus::Replied
    }
}
