//! Built-in responder.

use async_trait::async_trait;
use serde_json::json;

use crate::error::PipelineError;
use crate::parsers::InboundEvent;
use crate::pipeline::types::{Responder, ToolCall};
use crate::store::{MemoryEntry, Role};
use crate::tools::builtin::SEND_MESSAGE;

pub const DEFAULT_ACKNOWLEDGEMENT: &str =
    "Thanks for reaching out. We received your message and will follow up shortly.";

/// Acknowledges the first message of a conversation and stays quiet after
/// that, so a human can take over the thread.
#[derive(Debug, Clone)]
pub struct AcknowledgementResponder {
    message: String,
}

impl AcknowledgementResponder {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for AcknowledgementResponder {
    fn default() -> Self {
        Self::new(DEFAULT_ACKNOWLEDGEMENT)
    }
}

#[async_trait]
impl Responder for AcknowledgementResponder {
    async fn respond(&self, _event: &InboundEvent, history: &[MemoryEntry]) -> Result<Vec<ToolCall>, PipelineError> {
        if history.iter().any(|e| e.role == Role::Assistant) {
            return Ok(Vec::new());
        }
        Ok(vec![ToolCall::new(SEND_MESSAGE, json!({ "body": self.message }))])
    }
}
