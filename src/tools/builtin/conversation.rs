//! Conversation lifecycle tools.

use std::sync::Arc;

use serde_json::{Value, json};

use super::{CONVERSATION_HISTORY, END_CONVERSATION};
use crate::error::ToolError;
use crate::store::MemoryStore;
use crate::tools::tool::{ToolDefinition, ToolOutput, handler_fn, optional_str};

fn store_failure(tool: &str, e: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        name: tool.to_string(),
        reason: e.to_string(),
    }
}

/// Close the session, with an optional `summary`.
pub fn end_conversation_tool(store: Arc<dyn MemoryStore>) -> ToolDefinition {
    ToolDefinition::new(
        END_CONVERSATION,
        "End the current conversation, optionally recording a summary.",
        handler_fn(move |params, ctx| {
            let store = store.clone();
            Box::pin(async move {
                let summary = optional_str(&params, "summary");
                let session = store
                    .end_session(&ctx.conversation_id, summary)
                    .await
                    .map_err(|e| store_failure(END_CONVERSATION, e))?;
                tracing::info!(conversation_id = %ctx.conversation_id, "Conversation ended");
                let data = serde_json::to_value(&session).map_err(|e| store_failure(END_CONVERSATION, e))?;
                Ok::<_, ToolError>(ToolOutput::text("Conversation ended").with_data(data))
            })
        }),
    )
}

/// Stored history of the current conversation, oldest first. `limit` keeps
/// only the most recent entries.
pub fn conversation_history_tool(store: Arc<dyn MemoryStore>) -> ToolDefinition {
    ToolDefinition::new(
        CONVERSATION_HISTORY,
        "Return the stored messages of the current conversation.",
        handler_fn(move |params, ctx| {
            let store = store.clone();
            Box::pin(async move {
                let history = store
                    .conversation_history(&ctx.conversation_id)
                    .await
                    .map_err(|e| store_failure(CONVERSATION_HISTORY, e))?;

                let limit = params.get("limit").and_then(Value::as_u64).map(|l| l as usize);
                let skip = limit.map_or(0, |l| history.len().saturating_sub(l));
                let messages: Vec<Value> = history
                    .iter()
                    .skip(skip)
                    .map(|e| {
                        json!({
                            "role": e.role,
                            "content": e.content,
                            "createdAt": e.created_at.to_rfc3339(),
                        })
                    })
                    .collect();

                let response = format!("{} messages", messages.len());
                Ok::<_, ToolError>(ToolOutput::text(response).with_data(json!(messages)))
            })
        }),
    )
}
