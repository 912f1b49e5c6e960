//! # Spendcube
//!
//! Spending cubes: pre-aggregated, dimension-keyed cells over large tables
//! of financial transaction records. Answers "how much was spent, broken
//! down by X, filtered to Y" without rescanning the records for every
//! question.
//!
//! ## Features
//!
//! - **Deterministic cells**: SHA-1 cell identities over projected dimension values
//! - **Full-rebuild aggregation**: one atomic upsert per fact row
//! - **Drilldown queries**: cuts, regrouping, multi-key stable sorts, pages
//! - **Cube selection**: the smallest computed cube covering a query
//!
//! ## Modules
//!
//! - [`storage`]: Data model, cell stores, fact sources, dataset registry
//! - [`cube`]: Cube building, querying and selection
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spendcube::config::CubeConfig;
//! use spendcube::cube::{CubeBuilder, CubeQuery, CubeQueryEngine, CubeSelector};
//! use spendcube::storage::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteStore::open("./data".as_ref())?);
//!     let facts = MemoryFactSource::new(vec![
//!         FactRow::new("cra")
//!             .field("from", EntityRef::new("e1").name("Treasury"))
//!             .field("to", EntityRef::new("e2").name("Schools"))
//!             .field("time", DateRange::on("2010-05-01"))
//!             .amount(1500.0),
//!     ]);
//!     let builder = CubeBuilder::new(
//!         store.clone(),
//!         Arc::new(facts),
//!         Arc::new(JsonDatasetRepository::open("./data/datasets.json")?),
//!     );
//!
//!     // Define and build the default cube
//!     let mut dataset = Dataset::new("cra");
//!     builder.update_all_cubes(&mut dataset).await?;
//!
//!     // Spending per year, largest first
//!     let selector = CubeSelector::new(Arc::new(CubeQueryEngine::new(store, CubeConfig::default())));
//!     let query = CubeQuery::drilldown(&["year"]).order_by("amount", true).build();
//!     let result = selector.aggregate(&dataset, &query).await?;
//!
//!     println!("Found {} drilldowns", result.summary.num_drilldowns);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cube;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Cell, CellFilter, CubeStore, Dataset, DatasetRepository, DimensionValue, EntityRef, FactRow,
    FactSource, Scalar, StorageError, StorageResult,
};

pub use cube::{
    Cube, CubeBuilder, CubeError, CubeQuery, CubeQueryEngine, CubeResult, CubeSelector, CubeStats,
    QueryResult,
};

pub use config::{Config, ConfigError, CubeConfig, LoggingConfig, StorageConfig, StoreBackend};
