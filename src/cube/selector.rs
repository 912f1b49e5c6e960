//! Cube selection
//!
//! Picks the cube a query should read from: the smallest computed cube of
//! the dataset whose dimensions cover everything the query touches.

use crate::cube::error::{CubeError, CubeResult};
use crate::cube::query::{CubeQuery, CubeQueryEngine, QueryResult};
use crate::cube::Cube;
use crate::storage::Dataset;
use std::sync::Arc;
use tracing::{debug, warn};

/// Chooses cubes for queries
pub struct CubeSelector {
    engine: Arc<CubeQueryEngine>,
}

impl CubeSelector {
    pub fn new(engine: Arc<CubeQueryEngine>) -> Self {
        Self { engine }
    }

    /// Smallest computed cube covering `required`
    ///
    /// Candidates are tried by ascending cell count, cubes that were never
    /// computed last, ties by name.
    pub async fn find_cube<S: AsRef<str>>(
        &self,
        dataset: &Dataset,
        required: &[S],
    ) -> CubeResult<Option<Cube>> {
        let mut candidates: Vec<(&String, Option<u64>)> = dataset
            .cubes
            .iter()
            .filter(|(_, description)| description.covers(required))
            .map(|(name, description)| (name, description.num_cells))
            .collect();
        // BTreeMap order already breaks ties by name
        candidates.sort_by_key(|(_, cells)| (cells.is_none(), *cells));

        for (name, _) in candidates {
            let cube = match Cube::new(dataset, name) {
                Ok(cube) => cube,
                Err(e) => {
                    warn!("Skipping cube '{}': {}", name, e);
                    continue;
                }
            };
            if self.engine.is_computed(&cube).await? {
                debug!("Selected cube '{}' of dataset '{}'", name, dataset.name);
                return Ok(Some(cube));
            }
        }
        Ok(None)
    }

    /// Run `query` against the best cube for it
    pub async fn aggregate(&self, dataset: &Dataset, query: &CubeQuery) -> CubeResult<QueryResult> {
        let required = query.referenced_dimensions();
        let cube = self
            .find_cube(dataset, required.as_slice())
            .await?
            .ok_or_else(|| CubeError::NoMatchingCube {
                dataset: dataset.name.clone(),
                dimensions: required.join(", "),
            })?;
        self.engine.query(&cube, query).await
    }
}
