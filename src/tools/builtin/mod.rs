//! Built-in tools.

mod conversation;
mod messaging;

use std::sync::Arc;

pub use conversation::{conversation_history_tool, end_conversation_tool};
pub use messaging::{EmailReplyHandler, SendMessageHandler, send_message_tool};

use crate::router::ChannelRouters;
use crate::store::MemoryStore;
use crate::tools::ToolRegistry;

pub const SEND_MESSAGE: &str = "send_message";
pub const END_CONVERSATION: &str = "end_conversation";
pub const CONVERSATION_HISTORY: &str = "conversation_history";

/// Register every built-in tool.
pub async fn register_builtin_tools(
    registry: &ToolRegistry,
    routers: Arc<ChannelRouters>,
    store: Arc<dyn MemoryStore>,
) {
    registry.register(send_message_tool(routers)).await;
    registry.register(end_conversation_tool(store.clone())).await;
    registry.register(conversation_history_tool(store)).await;
    tracing::info!(count = registry.count().await, "Registered built-in tools");
}
