//! Error types for blueprint-forge

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::graph::diagnostics::Diagnostics;

/// Result type for forge operations
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Crate-level errors
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Blueprint root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("Output file already exists: {0} (overwriting is disabled)")]
    OutputExists(PathBuf),

    #[error(transparent)]
    Graph(#[from] GraphBuildError),

    #[error(transparent)]
    Language(#[from] LanguageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

/// The graph could not be built. Every collected error is carried, not just the first.
#[derive(Debug, Clone)]
pub struct GraphBuildError {
    pub diagnostics: Diagnostics,
}

impl GraphBuildError {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self { diagnostics }
    }
}

impl fmt::Display for GraphBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blueprint graph rejected with {} error(s):\n{}",
            self.diagnostics.error_count(),
            self.diagnostics.format_errors()
        )
    }
}

impl std::error::Error for GraphBuildError {}

/// Unsupported target language name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported language '{0}' (expected python, rust, typescript, javascript or go)")]
pub struct LanguageError(pub String);

/// Failure reported by a code generator after its own retries are exhausted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("generator could not be started: {0}")]
    Spawn(String),

    #[error("generator exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("generator returned an empty response")]
    EmptyResponse,

    #[error("generation attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation failed: {0}")]
    Other(String),
}
