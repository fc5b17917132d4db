//! Tool definitions, handlers and results.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::channels::Channel;
use crate::error::ToolError;

/// The inbound message a tool call is answering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContext {
    /// Message id of the inbound message (email only).
    pub message_id: Option<String>,
    /// Reference chain carried by the inbound message, oldest first.
    pub references: Vec<String>,
    pub subject: Option<String>,
}

/// Execution context handed to every handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContext {
    pub conversation_id: String,
    pub channel: Channel,
    /// Who a reply goes to by default.
    pub recipient: Option<String>,
    #[serde(default)]
    pub reply: Option<ReplyContext>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolContext {
    pub fn new(conversation_id: impl Into<String>, channel: Channel) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            channel,
            recipient: None,
            reply: None,
            metadata: Map::new(),
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_reply(mut self, reply: ReplyContext) -> Self {
        self.reply = Some(reply);
        self
    }
}

/// What a handler produces on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub data: Option<Value>,
    /// Human-readable summary.
    pub response: String,
}

impl ToolOutput {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            data: None,
            response: response.into(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Uniform result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub response: String,
}

impl ToolResult {
    pub fn ok(output: ToolOutput) -> Self {
        Self {
            success: true,
            data: output.data,
            error: None,
            response: output.response,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            data: None,
            response: format!("Tool failed: {error}"),
            error: Some(error),
        }
    }
}

/// A tool handler.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

type HandlerFn = dyn Fn(Value, ToolContext) -> BoxFuture<'static, Result<ToolOutput, ToolError>> + Send + Sync;

/// Handler backed by a closure.
pub struct FnHandler(Box<HandlerFn>);

#[async_trait]
impl ToolHandler for FnHandler {
    async fn call(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        (self.0)(params, ctx.clone()).await
    }
}

/// Wrap a closure returning a boxed future as a handler.
///
/// ```ignore
/// let echo = handler_fn(|params, _ctx| Box::pin(async move {
///     Ok(ToolOutput::text("echoed").with_data(params))
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value, ToolContext) -> BoxFuture<'static, Result<ToolOutput, ToolError>> + Send + Sync + 'static,
{
    Arc::new(FnHandler(Box::new(f)))
}

/// A named tool with a default handler and optional per-channel overrides.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    default_handler: Arc<dyn ToolHandler>,
    channel_handlers: HashMap<Channel, Arc<dyn ToolHandler>>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, default_handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default_handler,
            channel_handlers: HashMap::new(),
        }
    }

    pub fn with_channel_handler(mut self, channel: Channel, handler: Arc<dyn ToolHandler>) -> Self {
        self.channel_handlers.insert(channel, handler);
        self
    }

    /// Handler for `channel`, else the default.
    pub fn handler_for(&self, channel: Channel) -> Arc<dyn ToolHandler> {
        self.channel_handlers
            .get(&channel)
            .unwrap_or(&self.default_handler)
            .clone()
    }

    pub fn has_channel_handler(&self, channel: Channel) -> bool {
        self.channel_handlers.contains_key(&channel)
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<_> = self.channel_handlers.keys().map(Channel::as_str).collect();
        channels.sort_unstable();
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("channel_handlers", &channels)
            .finish()
    }
}

/// Extract a required string parameter.
pub fn require_str<'a>(tool: &str, params: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing '{name}' parameter"),
        })
}

/// Extract an optional string parameter.
pub fn optional_str<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}
