//! Cube definition and building
//!
//! [`CubeBuilder`] owns the write side of the engine. It registers cube
//! definitions on a dataset and (re)computes their cells from the dataset's
//! fact rows. Every compute is a full rebuild: the cube's collection is
//! dropped, recreated empty and refilled row by row.

use crate::cube::cell_key::{CellKeyBuilder, MONTH, TIME, YEAR};
use crate::cube::error::{CubeError, CubeResult};
use crate::cube::{allowed_dimensions, collection_name, validate_name, Cube};
use crate::storage::{CubeDescription, CubeStore, Dataset, DatasetRepository, FactSource, AMOUNT};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Name of the cube covering every dimension of a dataset
pub const DEFAULT_CUBE: &str = "default";

/// Dimensions a build refuses to aggregate over
const RESERVED_DIMENSIONS: [&str; 3] = ["id", "_id", AMOUNT];

/// Outcome of one cube build
#[derive(Debug, Clone, Serialize)]
pub struct CubeStats {
    pub cube: String,
    /// Cells in the collection after the build
    pub cells: u64,
    /// Fact rows folded into cells
    pub entries: u64,
    /// Sum of the fact amounts
    pub amount: f64,
    pub elapsed_ms: u64,
    pub computed_at: DateTime<Utc>,
}

impl std::fmt::Display for CubeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cube: {}, Cells: {}, Entries: {}, Amount: {:.2}, Took: {} ms",
            self.cube, self.cells, self.entries, self.amount, self.elapsed_ms
        )
    }
}

/// Defines cubes and computes their cells
pub struct CubeBuilder {
    store: Arc<dyn CubeStore>,
    facts: Arc<dyn FactSource>,
    datasets: Arc<dyn DatasetRepository>,
    /// One lock per cube collection; builds of the same cube never overlap.
    /// Entries live until the cube is dropped with [`CubeBuilder::drop_cubes`].
    build_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CubeBuilder {
    pub fn new(
        store: Arc<dyn CubeStore>,
        facts: Arc<dyn FactSource>,
        datasets: Arc<dyn DatasetRepository>,
    ) -> Self {
        Self {
            store,
            facts,
            datasets,
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) cube `name` on `dataset`
    ///
    /// The registration only lives on `dataset` until the next compute
    /// persists it.
    pub fn define<I, S>(&self, dataset: &mut Dataset, name: &str, dimensions: I) -> CubeResult<Cube>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_name("dataset", &dataset.name)?;
        validate_name("cube", name)?;

        let description = CubeDescription::new(dimensions);
        if description.dimensions.iter().any(|d| d == TIME) {
            return Err(CubeError::InvalidDimension(format!(
                "\"{}\" is not a valid dimension. Specify \"{}\" or \"{}\" and \"{}\" instead",
                TIME, YEAR, YEAR, MONTH
            )));
        }

        let allowed = allowed_dimensions(dataset);
        if let Some(bad) = description.dimensions.iter().find(|d| !allowed.contains(*d)) {
            return Err(CubeError::InvalidDimension(format!(
                "dimension '{}' is not allowed for dataset '{}', allowed dimensions: {:?}",
                bad, dataset.name, allowed
            )));
        }

        dataset.cubes.insert(name.to_string(), description);
        Cube::new(dataset, name)
    }

    /// Handle to an already registered cube
    pub fn cube(&self, dataset: &Dataset, name: &str) -> CubeResult<Cube> {
        Cube::new(dataset, name)
    }

    /// Handles to every registered cube, in name order
    pub fn list_cubes(&self, dataset: &Dataset) -> CubeResult<Vec<Cube>> {
        dataset
            .cubes
            .keys()
            .map(|name| Cube::new(dataset, name))
            .collect()
    }

    /// Define the `default` cube over every dimension of the dataset
    pub fn configure_default_cube(&self, dataset: &mut Dataset) -> CubeResult<Cube> {
        let mut dimensions: BTreeSet<String> = dataset.dimensions.iter().cloned().collect();
        dimensions.extend(["from", "to", YEAR].map(String::from));
        if dataset.time_axis.has_months() {
            dimensions.insert(MONTH.to_string());
        }
        for excluded in [TIME, "name", "label"] {
            dimensions.remove(excluded);
        }
        self.define(dataset, DEFAULT_CUBE, dimensions)
    }

    /// Rebuild the cells of cube `name` from the dataset's fact rows
    pub async fn compute(&self, dataset: &mut Dataset, name: &str) -> CubeResult<CubeStats> {
        let cube = Cube::new(dataset, name)?;
        if let Some(reserved) = RESERVED_DIMENSIONS.iter().find(|d| cube.has_dimension(d)) {
            return Err(CubeError::CubeDimension {
                cube: name.to_string(),
                dimension: reserved.to_string(),
            });
        }

        let lock = self.build_lock(&cube.collection).await;
        let _guard = lock.lock().await;

        info!("Computing cube '{}'...", name);
        debug!(
            dataset = %dataset.name,
            dimensions = %cube.dimensions.join(", "),
            "Cube definition"
        );
        let started = Instant::now();

        let keys = CellKeyBuilder::new(&cube.dimensions);
        let fields: BTreeSet<String> = keys.fetch_fields().iter().cloned().collect();

        self.store.drop_collection(&cube.collection).await?;
        self.store.create_collection(&cube.collection).await?;

        let mut entries = 0u64;
        let mut amount = 0.0;
        let mut rows = self.facts.scan(&dataset.name, &fields);
        while let Some(row) = rows.next().await {
            let cell = keys.cell(&row?)?;
            entries += 1;
            amount += cell.amount;
            self.store.upsert(&cube.collection, cell).await?;
        }

        let cells = self.store.count(&cube.collection).await?;
        if let Some(description) = dataset.cubes.get_mut(name) {
            description.num_cells = Some(cells);
        }
        self.datasets.save(dataset).await?;

        let stats = CubeStats {
            cube: name.to_string(),
            cells,
            entries,
            amount,
            elapsed_ms: started.elapsed().as_millis() as u64,
            computed_at: Utc::now(),
        };
        info!("Done. {}", stats);
        Ok(stats)
    }

    /// Re-derive the default cube, then rebuild every cube of the dataset
    pub async fn update_all_cubes(&self, dataset: &mut Dataset) -> CubeResult<Vec<CubeStats>> {
        self.configure_default_cube(dataset)?;
        let names: Vec<String> = dataset.cubes.keys().cloned().collect();

        let mut stats = Vec::with_capacity(names.len());
        for name in names {
            stats.push(self.compute(dataset, &name).await?);
        }
        Ok(stats)
    }

    /// Drop the collections of every cube registered on the dataset
    ///
    /// Returns the number of collections dropped. Cubes that were never
    /// computed have no collection and are not counted. The registry itself
    /// is left alone; the dataset is going away with its cubes.
    pub async fn drop_cubes(&self, dataset: &Dataset) -> CubeResult<usize> {
        let existing = self.store.collection_names().await?;
        let mut dropped = 0;

        for name in dataset.cubes.keys() {
            let collection = collection_name(&dataset.name, name);
            self.build_locks.lock().await.remove(&collection);
            if existing.contains(&collection) {
                debug!("Dropping cube collection {}", collection);
                self.store.drop_collection(&collection).await?;
                dropped += 1;
            }
        }
        info!(
            "Dropped {} cube collections of dataset '{}'",
            dropped, dataset.name
        );
        Ok(dropped)
    }

    async fn build_lock(&self, collection: &str) -> Arc<Mutex<()>> {
        let mut locks = self.build_locks.lock().await;
        locks.entry(collection.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        Cell, CellFilter, DateRange, EntityRef, FactRow, JsonDatasetRepository, MemoryFactSource,
        MemoryStore, SqliteStore, TimeAxis,
    };
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        store: Arc<dyn CubeStore>,
        builder: CubeBuilder,
        repo: Arc<JsonDatasetRepository>,
        _dir: TempDir,
    }

    fn entity(name: &str) -> EntityRef {
        EntityRef::new(format!("id-{}", name)).name(name)
    }

    fn transfers() -> Vec<FactRow> {
        [("a", "b"), ("a", "b"), ("b", "c"), ("b", "b"), ("c", "a"), ("c", "b")]
            .into_iter()
            .map(|(from, to)| {
                FactRow::new("cra")
                    .field("from", entity(from))
                    .field("to", entity(to))
                    .field("time", DateRange::on("2010-01-01"))
                    .amount(1000.0)
            })
            .collect()
    }

    fn fixture_with(store: Arc<dyn CubeStore>, rows: Vec<FactRow>) -> Fixture {
        let dir = tempdir().unwrap();
        let repo = Arc::new(JsonDatasetRepository::open(dir.path().join("datasets.json")).unwrap());
        let builder = CubeBuilder::new(
            store.clone(),
            Arc::new(MemoryFactSource::new(rows)),
            repo.clone(),
        );
        Fixture {
            store,
            builder,
            repo,
            _dir: dir,
        }
    }

    fn fixture(rows: Vec<FactRow>) -> Fixture {
        fixture_with(Arc::new(MemoryStore::new()), rows)
    }

    async fn cells(store: &Arc<dyn CubeStore>, collection: &str) -> Vec<Cell> {
        let fields = vec!["from".to_string(), "to".to_string()];
        store
            .find(collection, &CellFilter::new(), &fields)
            .await
            .unwrap()
    }

    #[test]
    fn test_define_rejects_time_and_unknown_dimensions() {
        let f = fixture(vec![]);
        let mut dataset = Dataset::new("cra").dimension("cofog1");

        assert!(matches!(
            f.builder.define(&mut dataset, "bad", ["time"]),
            Err(CubeError::InvalidDimension(_))
        ));
        assert!(matches!(
            f.builder.define(&mut dataset, "bad", ["from", "region"]),
            Err(CubeError::InvalidDimension(_))
        ));
        assert!(dataset.cubes.is_empty());

        let cube = f
            .builder
            .define(&mut dataset, "by_cofog", ["cofog1", "year"])
            .unwrap();
        assert_eq!(cube.dimensions, vec!["cofog1", "year"]);
        assert_eq!(dataset.cube("by_cofog").unwrap().num_cells, None);
        assert!(matches!(
            f.builder.cube(&dataset, "missing"),
            Err(CubeError::UndefinedCube { .. })
        ));
    }

    #[test]
    fn test_configure_default_cube() {
        let f = fixture(vec![]);

        let mut dataset = Dataset::new("cra");
        let cube = f.builder.configure_default_cube(&mut dataset).unwrap();
        assert_eq!(cube.name, DEFAULT_CUBE);
        assert_eq!(cube.dimensions, vec!["from", "to", "year"]);

        let mut dataset = Dataset::new("cra")
            .time_axis(TimeAxis::Month)
            .dimension("cofog1")
            .dimension("time")
            .dimension("name");
        let cube = f.builder.configure_default_cube(&mut dataset).unwrap();
        assert_eq!(cube.dimensions, vec!["cofog1", "from", "month", "to", "year"]);
    }

    #[tokio::test]
    async fn test_compute_aggregates_transfers() {
        let f = fixture(transfers());
        let mut dataset = Dataset::new("cra");
        f.builder.define(&mut dataset, "transfers", ["from", "to"]).unwrap();

        let stats = f.builder.compute(&mut dataset, "transfers").await.unwrap();
        assert_eq!(stats.cells, 5);
        assert_eq!(stats.entries, 6);
        assert_eq!(stats.amount, 6000.0);

        let cells = cells(&f.store, "cubes.cra.transfers").await;
        assert_eq!(cells.len(), 5);
        assert_eq!(cells.iter().map(|c| c.amount).sum::<f64>(), 6000.0);
        assert_eq!(cells.iter().map(|c| c.num_entries).sum::<u64>(), 6);

        let ab = CellFilter::new().cut("from.name", "a").cut("to.name", "b");
        let ab: Vec<&Cell> = cells.iter().filter(|c| ab.matches(c)).collect();
        assert_eq!(ab.len(), 1);
        assert_eq!(ab[0].amount, 2000.0);
        assert_eq!(ab[0].num_entries, 2);
        assert!(cells
            .iter()
            .filter(|c| c.id != ab[0].id)
            .all(|c| c.amount == 1000.0 && c.num_entries == 1));

        // registry refreshed and persisted
        assert_eq!(dataset.cube("transfers").unwrap().num_cells, Some(5));
        let saved = f.repo.load("cra").await.unwrap();
        assert_eq!(saved.cube("transfers").unwrap().num_cells, Some(5));
    }

    #[tokio::test]
    async fn test_compute_is_idempotent() {
        let f = fixture_with(Arc::new(SqliteStore::in_memory().unwrap()), transfers());
        let mut dataset = Dataset::new("cra");
        f.builder.define(&mut dataset, "transfers", ["from", "to"]).unwrap();

        f.builder.compute(&mut dataset, "transfers").await.unwrap();
        let first = cells(&f.store, "cubes.cra.transfers").await;
        f.builder.compute(&mut dataset, "transfers").await.unwrap();
        let second = cells(&f.store, "cubes.cra.transfers").await;

        assert_eq!(first, second);
        assert_eq!(second.iter().map(|c| c.amount).sum::<f64>(), 6000.0);
    }

    #[tokio::test]
    async fn test_compute_year_cube() {
        let mut rows = transfers();
        rows.push(
            FactRow::new("cra")
                .field("from", entity("a"))
                .field("time", DateRange::on("2011-06-30")),
        );
        rows.push(FactRow::new("other").field("from", entity("a")).amount(99.0));

        let f = fixture(rows);
        let mut dataset = Dataset::new("cra");
        f.builder.define(&mut dataset, "yearly", ["year"]).unwrap();

        let stats = f.builder.compute(&mut dataset, "yearly").await.unwrap();
        assert_eq!(stats.cells, 2);
        assert_eq!(stats.entries, 7);
        assert_eq!(stats.amount, 6000.0);

        let years: Vec<Cell> = f
            .store
            .find("cubes.cra.yearly", &CellFilter::new().cut("year", 2011i64), &["year".to_string()])
            .await
            .unwrap();
        assert_eq!(years.len(), 1);
        assert_eq!(years[0].amount, 0.0);
        assert_eq!(years[0].num_entries, 1);
    }

    #[tokio::test]
    async fn test_compute_backfills_entity_names() {
        let rows = vec![FactRow::new("cra")
            .field("from", EntityRef::new("anonymous").attr("note", "dropped"))
            .amount(5.0)];
        let f = fixture(rows);
        let mut dataset = Dataset::new("cra");
        f.builder.define(&mut dataset, "by_from", ["from"]).unwrap();
        f.builder.compute(&mut dataset, "by_from").await.unwrap();

        let cells = cells(&f.store, "cubes.cra.by_from").await;
        match cells[0].dimensions.get("from") {
            Some(crate::storage::DimensionValue::Entity(e)) => {
                assert_eq!(e.name.as_deref(), Some("anonymous"));
                assert!(e.extra.is_empty());
            }
            other => panic!("expected entity, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_compute_rejects_reserved_dimensions() {
        let f = fixture(transfers());
        let mut dataset = Dataset::new("cra").dimension("amount").dimension("id");

        for reserved in ["amount", "id"] {
            f.builder.define(&mut dataset, "bad", ["from", reserved]).unwrap();
            assert!(matches!(
                f.builder.compute(&mut dataset, "bad").await,
                Err(CubeError::CubeDimension { .. })
            ));
        }
        assert!(f.store.collection_names().await.unwrap().is_empty());
        assert!(f.repo.names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_build_still_computed() {
        let f = fixture(vec![]);
        let mut dataset = Dataset::new("cra");
        f.builder.define(&mut dataset, "empty", ["from"]).unwrap();

        let stats = f.builder.compute(&mut dataset, "empty").await.unwrap();
        assert_eq!(stats.cells, 0);
        assert!(f
            .store
            .collection_names()
            .await
            .unwrap()
            .contains("cubes.cra.empty"));
        assert_eq!(dataset.cube("empty").unwrap().num_cells, Some(0));
    }

    #[tokio::test]
    async fn test_update_all_and_drop_cubes() {
        let f = fixture(transfers());
        let mut dataset = Dataset::new("cra");
        f.builder.define(&mut dataset, "by_from", ["from"]).unwrap();
        f.store.create_collection("cubes.crafts.default").await.unwrap();

        let stats = f.builder.update_all_cubes(&mut dataset).await.unwrap();
        let names: Vec<&str> = stats.iter().map(|s| s.cube.as_str()).collect();
        assert_eq!(names, vec!["by_from", "default"]);
        assert_eq!(stats[0].cells, 3);
        assert_eq!(stats[1].cells, 5);
        assert_eq!(f.builder.list_cubes(&dataset).unwrap().len(), 2);

        let dropped = f.builder.drop_cubes(&dataset).await.unwrap();
        assert_eq!(dropped, 2);
        let remaining = f.store.collection_names().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains("cubes.crafts.default"));
    }

    #[tokio::test]
    async fn test_drop_cubes_only_touches_own_collections() {
        let f = fixture(transfers());
        let mut dataset = Dataset::new("cra");
        f.builder.define(&mut dataset, "c", ["from"]).unwrap();
        f.builder.compute(&mut dataset, "c").await.unwrap();
        f.builder.define(&mut dataset, "never_built", ["to"]).unwrap();
        f.store.create_collection("cubes.cra.x.c").await.unwrap();
        assert_eq!(f.builder.build_locks.lock().await.len(), 1);

        let dropped = f.builder.drop_cubes(&dataset).await.unwrap();
        assert_eq!(dropped, 1);
        let remaining = f.store.collection_names().await.unwrap();
        assert!(!remaining.contains("cubes.cra.c"));
        assert!(remaining.contains("cubes.cra.x.c"));
        assert!(f.builder.build_locks.lock().await.is_empty());
    }

    #[test]
    fn test_define_rejects_dotted_names() {
        let f = fixture(vec![]);
        let mut dotted = Dataset::new("cra.x");
        assert!(matches!(
            f.builder.define(&mut dotted, "c", ["from"]),
            Err(CubeError::InvalidName(_))
        ));
        assert!(dotted.cubes.is_empty());

        let mut dataset = Dataset::new("cra");
        assert!(matches!(
            f.builder.define(&mut dataset, "x.c", ["from"]),
            Err(CubeError::InvalidName(_))
        ));
        assert!(dataset.cubes.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_builds_of_one_cube() {
        let f = Arc::new(fixture(transfers()));
        let mut dataset = Dataset::new("cra");
        f.builder.define(&mut dataset, "transfers", ["from", "to"]).unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let f = f.clone();
            let mut dataset = dataset.clone();
            handles.push(tokio::spawn(async move {
                f.builder.compute(&mut dataset, "transfers").await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().cells, 5);
        }

        let cells = cells(&f.store, "cubes.cra.transfers").await;
        assert_eq!(cells.iter().map(|c| c.amount).sum::<f64>(), 6000.0);
    }
}
