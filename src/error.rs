//! Error types for Ambient Mail.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail transport errors — listing, fetching, and sending messages.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("List request failed: {0}")]
    ListFailed(String),

    #[error("Fetch failed for message {id}: {reason}")]
    FetchFailed { id: String, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Malformed message {id}: {reason}")]
    MalformedMessage { id: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Inference collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Pipeline stage errors. Every variant is recovered inside the pipeline
/// with a deterministic fallback — a submission never fails because a
/// collaborator did.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Approval resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("No pending approval for token {0}")]
    UnknownToken(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
