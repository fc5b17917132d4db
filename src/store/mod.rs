//! Persistence: the conversation Memory Store and the allow-list backend.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use memory::InMemoryStore;
pub use traits::{
    AllowlistBackend, AllowlistEntry, MemoryEntry, MemoryQuery, MemoryStore, OrderBy,
    OrderDirection, Role, Session, keys,
};
