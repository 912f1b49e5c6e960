//! Cube Aggregation Engine
//!
//! Pre-aggregates the fact rows of a dataset into dimension-keyed cells and
//! answers drilldown queries from those cells:
//!
//! - **cell_key**: Cell identity hashing and value snapshots
//! - **builder**: Cube definition and full-rebuild aggregation
//! - **query**: Cut, regroup, sort and paginate over a built cube
//! - **selector**: Picking the smallest computed cube for a query
//! - **error**: Error types
//!
//! # Example
//!
//! ```rust,no_run
//! use spendcube::config::CubeConfig;
//! use spendcube::cube::{CubeBuilder, CubeQuery, CubeQueryEngine};
//! use spendcube::storage::{Dataset, JsonDatasetRepository, JsonLinesFactSource, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let builder = CubeBuilder::new(
//!         store.clone(),
//!         Arc::new(JsonLinesFactSource::new("facts.jsonl")),
//!         Arc::new(JsonDatasetRepository::open("datasets.json")?),
//!     );
//!
//!     let mut dataset = Dataset::new("cra").dimension("cofog1");
//!     builder.define(&mut dataset, "by_region", ["from", "to"])?;
//!     builder.compute(&mut dataset, "by_region").await?;
//!
//!     let engine = CubeQueryEngine::new(store, CubeConfig::default());
//!     let cube = builder.cube(&dataset, "by_region")?;
//!     let result = engine
//!         .query(&cube, &CubeQuery::drilldown(&["from"]).order_by("amount", true).build())
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod cell_key;
pub mod error;
pub mod query;
pub mod selector;

pub use builder::{CubeBuilder, CubeStats, DEFAULT_CUBE};
pub use cell_key::{hash_values, CellKeyBuilder};
pub use error::{CubeError, CubeResult};
pub use query::{CubeQuery, CubeQueryBuilder, CubeQueryEngine, DrilldownItem, OrderKey, QueryResult, Summary};
pub use selector::CubeSelector;

use crate::storage::Dataset;
use serde::Serialize;
use std::collections::BTreeSet;

/// Dimensions any cube may use, besides the dataset's own keys
const BUILTIN_DIMENSIONS: [&str; 5] = ["from", "to", "dataset", "year", "month"];

/// Keys that are never cube dimensions
const EXCLUDED_DIMENSIONS: [&str; 2] = ["name", "label"];

/// Name of the collection holding a cube's cells
///
/// Distinct (dataset, cube) pairs map to distinct collections as long as
/// both names pass [`validate_name`].
pub fn collection_name(dataset: &str, cube: &str) -> String {
    format!("cubes.{}.{}", dataset, cube)
}

/// Reject names that would make collection names ambiguous
///
/// `.` separates the parts of a collection name, so neither a dataset nor
/// a cube may contain one.
pub fn validate_name(kind: &str, name: &str) -> CubeResult<()> {
    if name.is_empty() {
        return Err(CubeError::InvalidName(format!("{} name is empty", kind)));
    }
    if name.contains('.') {
        return Err(CubeError::InvalidName(format!(
            "{} name '{}' must not contain '.'",
            kind, name
        )));
    }
    Ok(())
}

/// Dimensions a cube of `dataset` may aggregate over
pub fn allowed_dimensions(dataset: &Dataset) -> BTreeSet<String> {
    dataset
        .dimensions
        .iter()
        .map(String::as_str)
        .chain(BUILTIN_DIMENSIONS)
        .filter(|d| !EXCLUDED_DIMENSIONS.contains(d))
        .map(str::to_string)
        .collect()
}

/// Handle to a cube registered on a dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cube {
    pub dataset: String,
    pub name: String,
    /// Storage collection of the cube's cells
    pub collection: String,
    /// Sorted dimension set
    pub dimensions: Vec<String>,
}

impl Cube {
    /// Resolve a registered cube of `dataset`
    ///
    /// Fails if either name is invalid, if the cube is not registered, or if
    /// its dimensions are no longer allowed for the dataset.
    pub fn new(dataset: &Dataset, name: &str) -> CubeResult<Self> {
        validate_name("dataset", &dataset.name)?;
        validate_name("cube", name)?;
        let description = dataset.cube(name).ok_or_else(|| CubeError::UndefinedCube {
            dataset: dataset.name.clone(),
            cube: name.to_string(),
        })?;

        let allowed = allowed_dimensions(dataset);
        let not_allowed: Vec<&str> = description
            .dimensions
            .iter()
            .map(String::as_str)
            .filter(|d| !allowed.contains(*d))
            .collect();
        if !not_allowed.is_empty() {
            return Err(CubeError::InvalidDimension(format!(
                "dimensions {:?} of cube '{}' are not allowed, allowed dimensions: {:?}",
                not_allowed, name, allowed
            )));
        }

        Ok(Self {
            dataset: dataset.name.clone(),
            name: name.to_string(),
            collection: collection_name(&dataset.name, name),
            dimensions: description.dimensions.clone(),
        })
    }

    pub fn has_dimension(&self, dimension: &str) -> bool {
        self.dimensions.iter().any(|d| d == dimension)
    }
}
