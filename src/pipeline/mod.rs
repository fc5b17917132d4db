//! Inbound message pipeline.
//!
//! Every webhook payload flows through:
//! 1. `parsers::parse_as()`: provider payload to [`InboundEvent`](crate::parsers::InboundEvent)
//! 2. `ConversationMatcher`: resolve or create the conversation, store the entry
//! 3. `LoopGuard`: decide whether an automated reply may be sent
//! 4. `Responder` + `ToolRegistry`: produce and run tool calls
//! 5. assistant entries stored for sent messages, allow-list flushed

pub mod processor;
pub mod responder;
pub mod types;

pub use processor::InboundProcessor;
pub use responder::{AcknowledgementResponder, DEFAULT_ACKNOWLEDGEMENT};
pub use types::{InboundOutcome, OutcomeStatus, Responder, ToolCall, ToolInvocation};
