//! Error types for Switchboard.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors (Memory Store and allow-list backend).
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Inbound payload parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },

    #[error("Payload from {provider} is missing required field {field}")]
    MissingField { provider: String, field: String },

    #[error("Invalid payload from {provider}: {reason}")]
    InvalidPayload { provider: String, reason: String },
}

/// Outbound provider errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} failed to send: {reason}")]
    SendFailed { provider: String, reason: String },

    #[error("Provider {provider} rejected the message: {reason}")]
    InvalidMessage { provider: String, reason: String },

    #[error("No providers registered for channel {channel}")]
    NoProviders { channel: String },
}

impl ProviderError {
    /// Name of the provider that produced the error, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::SendFailed { provider, .. } | Self::InvalidMessage { provider, .. } => {
                Some(provider)
            }
            Self::NoProviders { .. } => None,
        }
    }
}

/// Tool dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },
}

/// Inbound pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Responder failed: {0}")]
    Responder(String),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
