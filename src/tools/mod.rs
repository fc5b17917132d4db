//! Tool dispatch: named tools with per-channel handlers.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::ToolRegistry;
pub use tool::*;
