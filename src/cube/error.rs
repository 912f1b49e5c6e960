//! Cube error types
//!
//! Defines all error conditions that can occur while defining, building,
//! querying and selecting cubes.

use thiserror::Error;

/// Errors that can occur during cube operations
#[derive(Error, Debug)]
pub enum CubeError {
    /// A cube definition names a dimension that cannot be used
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    /// A dataset or cube name cannot be mapped to a collection
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// The dataset has no cube with this name
    #[error("Cube '{cube}' is not defined for dataset '{dataset}'")]
    UndefinedCube { dataset: String, cube: String },

    /// A build would aggregate over a unique or measure field
    #[error("Not computing cube '{cube}' over dimension '{dimension}': no aggregation would be performed")]
    CubeDimension { cube: String, dimension: String },

    /// The cube's collection does not exist yet
    #[error("Cube '{0}' has not been computed")]
    NotComputed(String),

    /// A drilldown is not a dimension of the cube
    #[error("Can't drill down on '{dimension}', allowed dimensions are: {allowed}")]
    UnknownDrilldown { dimension: String, allowed: String },

    /// A cut references a dimension outside the cube
    #[error("Can't cut on '{dimension}', allowed dimensions are: {allowed}")]
    UnknownCutDimension { dimension: String, allowed: String },

    /// An order key is neither a drilldown nor the amount
    #[error("Can't order by '{0}': order dimensions must be drilldowns or amount")]
    UnknownOrderDimension(String),

    /// Malformed query parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// No registered cube covers the requested dimensions
    #[error("No computed cube of dataset '{dataset}' covers: {dimensions}")]
    NoMatchingCube { dataset: String, dimensions: String },

    /// A fact row cannot be folded into a cell
    #[error("Invalid fact: {0}")]
    InvalidFact(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// Result type for cube operations
pub type CubeResult<T> = Result<T, CubeError>;
