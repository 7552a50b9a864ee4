//! Error types for the recognition pipeline.
//!
//! Only two kinds of failure ever reach the HTTP layer: bad caller input and
//! OCR backend failures. Extraction problems are absorbed by the normalizer
//! (the request still succeeds with empty fields), and context-release
//! failures are logged but never surfaced.

use thiserror::Error;

/// An error from the OCR backend. Not retried; the session manager releases
/// the execution context and re-raises.
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The backend could not create an execution context (missing language
    /// data, engine initialization failure, etc.).
    #[error("failed to initialize recognition context: {0}")]
    Init(String),

    /// The image bytes could not be decoded by the backend.
    #[error("could not decode image: {0}")]
    ImageDecode(String),

    /// Recognition itself failed.
    #[error("recognition failed: {0}")]
    Engine(String),
}

/// A request-level failure from the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The caller's input was malformed. Maps to HTTP 400.
    #[error("{0}")]
    Validation(String),

    /// The OCR backend failed. Maps to HTTP 500.
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
}

impl PipelineError {
    /// Build a validation error from anything printable.
    pub fn validation(message: impl Into<String>) -> Self {
        PipelineError::Validation(message.into())
    }
}
