//! Error types for Ferrite.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    // Build errors
    #[error("Build not found: {0}")]
    BuildNotFound(i32),

    #[error("Invalid build status: {0}")]
    InvalidBuildStatus(String),

    // Scheduling errors
    #[error("Plan creation failed: {0}")]
    PlanCreation(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Scan failed for resource {resource}: {message}")]
    Scan { resource: String, message: String },

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
