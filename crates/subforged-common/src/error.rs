//! Error taxonomy for job orchestration.
//!
//! Every failure the orchestration core can report funnels into [`Error`],
//! which carries enough context for the transport layer to derive an HTTP
//! status code via [`Error::http_status`].

use std::fmt;

/// Unified error type covering all failure modes in subforged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The uploaded input is not a supported media type. No job is created.
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The input could not be persisted. No job is created.
    #[error("Storage write failed: {source}")]
    StorageWriteFailed {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job", "artifact").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The artifact was requested before the job completed.
    #[error("Job {id} is not ready (state: {state})")]
    NotReady {
        /// The job that was asked for.
        id: String,
        /// The job's current state.
        state: String,
    },

    /// A terminal job was asked to change state.
    #[error("Invalid transition for job {id}: already {state}")]
    InvalidTransition {
        /// The job that was mutated.
        id: String,
        /// The terminal state the job is already in.
        state: String,
    },

    /// The transcoding engine reported a failure.
    #[error("Engine failure: {0}")]
    EngineFailure(String),

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An artifact reference resolved outside its storage root.
    #[error("Invalid artifact path: {0}")]
    PathTraversal(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg) could not be located or started.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::UnsupportedMediaType(_) => 415,
            Error::StorageWriteFailed { .. } => 500,
            Error::NotFound { .. } => 404,
            Error::NotReady { .. } => 409,
            Error::InvalidTransition { .. } => 409,
            Error::EngineFailure(_) => 502,
            Error::Validation(_) => 400,
            Error::PathTraversal(_) => 403,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnsupportedMediaType(_) => "unsupported_media_type",
            Error::StorageWriteFailed { .. } => "storage_write_failed",
            Error::NotFound { .. } => "not_found",
            Error::NotReady { .. } => "not_ready",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::EngineFailure(_) => "engine_failure",
            Error::Validation(_) => "validation_error",
            Error::PathTraversal(_) => "invalid_path",
            Error::Io { .. } => "io_error",
            Error::Tool { .. } => "tool_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::NotReady`].
    pub fn not_ready(id: impl fmt::Display, state: impl fmt::Display) -> Self {
        Error::NotReady {
            id: id.to_string(),
            state: state.to_string(),
        }
    }

    /// Convenience constructor for [`Error::InvalidTransition`].
    pub fn invalid_transition(id: impl fmt::Display, state: impl fmt::Display) -> Self {
        Error::InvalidTransition {
            id: id.to_string(),
            state: state.to_string(),
        }
    }

    /// Convenience constructor for [`Error::StorageWriteFailed`].
    pub fn storage_write(source: std::io::Error) -> Self {
        Error::StorageWriteFailed { source }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
