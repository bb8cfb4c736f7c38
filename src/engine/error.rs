//! Error types for the iteration engine.
//!
//! Structural and configuration problems are `EngineError`s. Validation
//! findings (gaps, overlaps, unassigned categories) are not errors in this
//! sense: they travel inside `ValidationReport` and `IterationOutput`.

use polars::prelude::PolarsError;
use thiserror::Error;

use super::ids::IterationId;

/// Result alias used throughout the engine.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),

    #[error("Failed to encode or decode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Column '{0}' was not found in the active data sources")]
    ColumnNotFound(String),

    #[error("Column '{column}' cannot be used as a {expected} variable (found type: {found})")]
    WrongColumnType {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("Column '{column}' has {found} distinct categories, more than the allowed {max}")]
    CardinalityExceeded {
        column: String,
        found: usize,
        max: usize,
    },

    #[error("Iteration {0} does not exist")]
    UnknownIteration(IterationId),

    #[error("Iteration {0} is inactive because its variable is no longer available")]
    InactiveIteration(IterationId),

    #[error("Id {0} does not address a stored iteration")]
    InvalidId(IterationId),

    #[error("Iteration {0} already exists")]
    DuplicateIteration(IterationId),

    #[error("Group index {0} does not exist")]
    InvalidGroupIndex(usize),

    #[error("Group index {0} already exists")]
    DuplicateGroupIndex(usize),

    #[error("At least one group must be selected")]
    EmptySelection,

    #[error("Cannot remove group {index}: it is the last remaining group")]
    LastGroup { index: usize },

    #[error("Cannot add a child below iteration {parent}: maximum depth of {max} reached")]
    DepthExceeded { parent: IterationId, max: usize },

    #[error("Expected {expected} values, got {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("Invalid risk segment grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid risk segment table: {0}")]
    InvalidRiskSegments(String),

    #[error("Risk segment {0} does not exist")]
    UnknownRiskSegment(usize),

    #[error("Malformed filter '{text}': {reason}")]
    MalformedFilter { text: String, reason: String },

    #[error("Filter '{0}' is not defined")]
    UnknownFilter(String),

    #[error("Operation requires a {expected} iteration, but iteration {iteration} is not one")]
    WrongIterationKind {
        iteration: IterationId,
        expected: &'static str,
    },

    #[error("Iteration {0} needs its parent's risk segments to resolve")]
    MissingParentOutput(IterationId),

    #[error("Every risk segment already has a group")]
    NoFreeSegment,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Auto-banding failed: {0}")]
    AutoBand(String),
}
