//! Error types for Vendora.

use uuid::Uuid;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Email error: {0}")]
    Email(#[from] EmailError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

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

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Email channel errors.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Failed to send email to {to}: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Failed to parse inbound message: {0}")]
    ParseFailed(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Deployment platform errors.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Deploy request failed: {0}")]
    RequestFailed(String),

    #[error("Platform returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid platform response: {0}")]
    InvalidResponse(String),

    #[error("Source not available for deployment {0}")]
    SourceUnavailable(String),
}

/// Workflow precondition and dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Prospect {0} not found")]
    ProspectNotFound(Uuid),

    #[error("Prospect {0} has no contact email")]
    MissingContact(Uuid),

    #[error("Site {0} not found")]
    SiteNotFound(Uuid),

    #[error("Site {0} has no deployment to edit")]
    NoDeployment(Uuid),

    #[error("No template for sequence step {0}")]
    NoTemplate(u32),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
