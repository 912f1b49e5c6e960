//! Spendcube Storage Layer
//!
//! This module provides everything the cube engine reads from and writes to:
//!
//! - **types**: Core data structures (DimensionValue, FactRow, Cell, CellFilter)
//! - **store**: The `CubeStore` trait and the in-memory cell store
//! - **sqlite**: SQLite-backed cell store
//! - **facts**: Fact sources (in-memory, JSON lines)
//! - **dataset**: Dataset metadata and the cube registry
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Build Path:
//!   FactSource → scan(dataset, fields) → CellKey → CubeStore::upsert
//!
//! Read Path:
//!   CubeStore::find(filter, fields) → Regroup → Sort → Page
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use spendcube::storage::{Cell, CellFilter, CubeStore, MemoryStore};
//! use std::collections::BTreeMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new();
//!     store.upsert("cubes.cra.default", Cell::new("c1", BTreeMap::new(), 10.0)).await?;
//!
//!     let cells = store.find("cubes.cra.default", &CellFilter::new(), &[]).await?;
//!     assert_eq!(cells.len(), 1);
//!     Ok(())
//! }
//! ```

pub mod dataset;
pub mod error;
pub mod facts;
pub mod sqlite;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use dataset::{CubeDescription, Dataset, DatasetRepository, JsonDatasetRepository, TimeAxis};
pub use error::{StorageError, StorageResult};
pub use facts::{FactSource, FactStream, JsonLinesFactSource, MemoryFactSource};
pub use sqlite::SqliteStore;
pub use store::{CubeStore, MemoryStore};
pub use types::{
    Cell, CellFilter, DatePart, DateRange, DimensionValue, EntityRef, FactRow, Scalar, AMOUNT,
    DATASET, NUM_ENTRIES,
};
