// src/utils/error.rs
use thiserror::Error;

// Define specific error types for different parts of the application

/// Errors raised by the query/collection/option engine.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Expression could not be evaluated: {0}")]
    Expression(String),

    #[error("Unable to interpret expression '{0}'")]
    Interpretation(String),

    #[error("Invalid definition: {0}")]
    Validation(String),

    #[error("Required value was empty: {0}")]
    Require(String),

    #[error("Expected a single result: {0}")]
    Cardinality(String),

    #[error("Post-processing failed: {0}")]
    PostProcess(String),

    #[error("No strategy matched: {0}")]
    StrategyExhausted(String),

    /// Breadcrumb wrapper: a component or field name prepended to the
    /// error it caught, forming a trail as the failure unwinds through
    /// nested queries and collections.
    #[error("{scope} - {source}")]
    Scoped {
        scope: String,
        #[source]
        source: Box<ExtractError>,
    },
}

impl ExtractError {
    /// Wraps an error with the name of the component it escaped from.
    pub fn scoped(scope: impl Into<String>, source: ExtractError) -> Self {
        ExtractError::Scoped {
            scope: scope.into(),
            source: Box::new(source),
        }
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error), // Automatically convert reqwest errors

    #[error("HTTP error: {0}")]
    Http(reqwest::StatusCode), // e.g., 404 Not Found, 403 Forbidden

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically convert IO errors

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Document loading failed: {0}")]
    Source(#[from] SourceError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
