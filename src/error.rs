//! Error handling module for the bartender engine
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Each concern (parsing, validation, transport, execution) owns its own error
//! enum; `BartenderError` wraps them for callers that do not care which layer
//! failed.

use thiserror::Error;

use crate::dispenser::DispenserError;
use crate::executor::ExecutionError;
use crate::recipe::authoring::AuthoringError;
use crate::recipe::parser::ParseError;
use crate::recipe::store::RecipeStoreError;
use crate::recipe::validator::ValidationError;
use crate::transport::TransportError;

/// Main error type for the bartender engine
#[derive(Error, Debug)]
pub enum BartenderError {
    /// IO errors (config file, recipe directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Recipe text could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Recipe is well-formed but does not fit the calibration config
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Device could not be reached or answered garbage
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A run aborted mid-way
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Recipe could not be generated or customized
    #[error(transparent)]
    Authoring(#[from] AuthoringError),

    /// Run could not be started
    #[error(transparent)]
    Dispenser(#[from] DispenserError),

    /// Recipe storage errors
    #[error(transparent)]
    RecipeStore(#[from] RecipeStoreError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for bartender operations
pub type Result<T> = std::result::Result<T, BartenderError>;
