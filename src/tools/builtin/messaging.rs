//! `send_message`: reply to the current participant.
//!
//! Parameters: `body` (required), `to`, `subject`, `provider` (forced
//! provider name), `tags`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::SEND_MESSAGE;
use crate::channels::Channel;
use crate::error::ToolError;
use crate::router::{ChannelRouters, OutboundMessage, SendReceipt};
use crate::threading::strip_reply_prefixes;
use crate::tools::tool::{ToolContext, ToolDefinition, ToolHandler, ToolOutput, optional_str, require_str};

pub fn send_message_tool(routers: Arc<ChannelRouters>) -> ToolDefinition {
    ToolDefinition::new(
        SEND_MESSAGE,
        "Send a message to the participant of the current conversation.",
        Arc::new(SendMessageHandler::new(routers.clone())),
    )
    .with_channel_handler(Channel::Email, Arc::new(EmailReplyHandler::new(routers)))
}

fn recipient<'a>(params: &'a Value, ctx: &'a ToolContext) -> Result<&'a str, ToolError> {
    optional_str(params, "to")
        .or(ctx.recipient.as_deref())
        .ok_or_else(|| ToolError::InvalidParameters {
            name: SEND_MESSAGE.into(),
            reason: "no recipient in parameters or context".into(),
        })
}

fn tags(params: &Value) -> Vec<String> {
    params
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

async fn dispatch(
    routers: &ChannelRouters,
    mut message: OutboundMessage,
    params: &Value,
    ctx: &ToolContext,
) -> Result<ToolOutput, ToolError> {
    message.conversation_id = Some(ctx.conversation_id.clone());
    let forced = optional_str(params, "provider");

    let receipt: SendReceipt = routers
        .send(&message, forced)
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            name: SEND_MESSAGE.into(),
            reason: e.to_string(),
        })?;

    Ok(ToolOutput::text(format!("Message sent via {}", receipt.provider)).with_data(json!({
        "channel": message.channel,
        "to": message.to,
        "subject": message.subject,
        "body": message.body,
        "provider": receipt.provider,
        "messageId": receipt.message_id,
        "attempted": receipt.attempted,
    })))
}

/// Plain-text send on the context's channel (SMS, voice follow-up).
pub struct SendMessageHandler {
    routers: Arc<ChannelRouters>,
}

impl SendMessageHandler {
    pub fn new(routers: Arc<ChannelRouters>) -> Self {
        Self { routers }
    }
}

#[async_trait]
impl ToolHandler for SendMessageHandler {
    async fn call(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let body = require_str(SEND_MESSAGE, &params, "body")?;
        let to = recipient(&params, ctx)?;
        let message = OutboundMessage::new(ctx.channel, to, body).with_tags(tags(&params));
        dispatch(&self.routers, message, &params, ctx).await
    }
}

/// Email send that threads under the inbound message.
pub struct EmailReplyHandler {
    routers: Arc<ChannelRouters>,
}

impl EmailReplyHandler {
    pub fn new(routers: Arc<ChannelRouters>) -> Self {
        Self { routers }
    }
}

#[async_trait]
impl ToolHandler for EmailReplyHandler {
    async fn call(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let body = require_str(SEND_MESSAGE, &params, "body")?;
        let to = recipient(&params, ctx)?;
        let mut message = OutboundMessage::new(Channel::Email, to, body).with_tags(tags(&params));

        let reply = ctx.reply.clone().unwrap_or_default();
        let subject = match optional_str(&params, "subject") {
            Some(s) => s.to_string(),
            None => match reply.subject.as_deref().map(strip_reply_prefixes) {
                Some(base) if !base.is_empty() => format!("Re: {base}"),
                _ => "Re: your message".to_string(),
            },
        };
        message = message.with_subject(subject);

        if let Some(parent) = reply.message_id {
            message = message.in_reply_to(parent, reply.references);
        }

        dispatch(&self.routers, message, &params, ctx).await
    }
}
