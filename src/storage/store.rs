//! Cell stores
//!
//! A [`CubeStore`] holds named collections of cells, one collection per
//! cube. The trait mirrors a schemaless document store: collections spring
//! into existence on first insert, `find` on a missing collection is empty,
//! and `increment` on a missing cell does nothing.
//!
//! [`MemoryStore`] keeps everything behind a Tokio `RwLock` and is the
//! default for tests and one-off runs; see [`crate::storage::SqliteStore`]
//! for the durable variant.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Cell, CellFilter};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Storage for cube cells
#[async_trait]
pub trait CubeStore: Send + Sync {
    /// Names of all existing collections
    async fn collection_names(&self) -> StorageResult<HashSet<String>>;

    /// Create an empty collection; no-op if it exists
    async fn create_collection(&self, name: &str) -> StorageResult<()>;

    /// Remove a collection and all its cells; no-op if it does not exist
    async fn drop_collection(&self, name: &str) -> StorageResult<()>;

    /// Cells passing `filter`, projected to `fields`, in insertion order
    async fn find(
        &self,
        collection: &str,
        filter: &CellFilter,
        fields: &[String],
    ) -> StorageResult<Vec<Cell>>;

    /// Look up a single cell by id
    async fn find_one(&self, collection: &str, cell_id: &str) -> StorageResult<Option<Cell>>;

    /// Insert a new cell, creating the collection if needed
    async fn insert(&self, collection: &str, cell: Cell) -> StorageResult<()>;

    /// Add to a stored cell's measures
    async fn increment(
        &self,
        collection: &str,
        cell_id: &str,
        amount: f64,
        num_entries: u64,
    ) -> StorageResult<()>;

    /// Insert `cell`, or fold its measures into the stored cell with that id
    ///
    /// The default is a read followed by a write; stores that can do this
    /// atomically override it.
    async fn upsert(&self, collection: &str, cell: Cell) -> StorageResult<()> {
        match self.find_one(collection, &cell.id).await? {
            Some(_) => {
                self.increment(collection, &cell.id, cell.amount, cell.num_entries)
                    .await
            }
            None => self.insert(collection, cell).await,
        }
    }

    /// Number of cells in a collection (0 if missing)
    async fn count(&self, collection: &str) -> StorageResult<u64>;
}

/// Cells of one collection, in insertion order
#[derive(Debug, Default)]
struct Collection {
    cells: Vec<Cell>,
    by_id: HashMap<String, usize>,
}

impl Collection {
    fn insert(&mut self, cell: Cell) -> StorageResult<()> {
        if self.by_id.contains_key(&cell.id) {
            return Err(StorageError::InvalidDocument(format!(
                "duplicate cell id {}",
                cell.id
            )));
        }
        self.by_id.insert(cell.id.clone(), self.cells.len());
        self.cells.push(cell);
        Ok(())
    }

    fn get_mut(&mut self, cell_id: &str) -> Option<&mut Cell> {
        let idx = *self.by_id.get(cell_id)?;
        self.cells.get_mut(idx)
    }
}

/// In-memory cell store
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CubeStore for MemoryStore {
    async fn collection_names(&self) -> StorageResult<HashSet<String>> {
        let collections = self.collections.read().await;
        Ok(collections.keys().cloned().collect())
    }

    async fn create_collection(&self, name: &str) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        collections.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        collections.remove(name);
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &CellFilter,
        fields: &[String],
    ) -> StorageResult<Vec<Cell>> {
        let collections = self.collections.read().await;
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(coll
            .cells
            .iter()
            .filter(|cell| filter.matches(cell))
            .map(|cell| cell.project(fields))
            .collect())
    }

    async fn find_one(&self, collection: &str, cell_id: &str) -> StorageResult<Option<Cell>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|coll| {
            coll.by_id
                .get(cell_id)
                .and_then(|&idx| coll.cells.get(idx))
                .cloned()
        }))
    }

    async fn insert(&self, collection: &str, cell: Cell) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(cell)
    }

    async fn increment(
        &self,
        collection: &str,
        cell_id: &str,
        amount: f64,
        num_entries: u64,
    ) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        if let Some(cell) = collections
            .get_mut(collection)
            .and_then(|coll| coll.get_mut(cell_id))
        {
            cell.amount += amount;
            cell.num_entries += num_entries;
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, cell: Cell) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        let coll = collections.entry(collection.to_string()).or_default();
        match coll.get_mut(&cell.id) {
            Some(stored) => {
                stored.amount += cell.amount;
                stored.num_entries += cell.num_entries;
                Ok(())
            }
            None => coll.insert(cell),
        }
    }

    async fn count(&self, collection: &str) -> StorageResult<u64> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|coll| coll.cells.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{DimensionValue, EntityRef};
    use std::collections::BTreeMap;

    fn cell(id: &str, from: &str, amount: f64) -> Cell {
        let mut dims = BTreeMap::new();
        dims.insert(
            "from".to_string(),
            DimensionValue::from(EntityRef::new(from).name(from)),
        );
        dims.insert("year".to_string(), DimensionValue::from(2010i64));
        Cell::new(id, dims, amount)
    }

    #[tokio::test]
    async fn test_collections_lifecycle() {
        let store = MemoryStore::new();
        assert!(store.collection_names().await.unwrap().is_empty());

        store.create_collection("cubes.cra.default").await.unwrap();
        assert!(store
            .collection_names()
            .await
            .unwrap()
            .contains("cubes.cra.default"));
        assert_eq!(store.count("cubes.cra.default").await.unwrap(), 0);

        store.insert("cubes.cra.other", cell("c1", "a", 1.0)).await.unwrap();
        assert_eq!(store.collection_names().await.unwrap().len(), 2);

        store.drop_collection("cubes.cra.default").await.unwrap();
        store.drop_collection("cubes.cra.missing").await.unwrap();
        assert_eq!(store.collection_names().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_find_increment() {
        let store = MemoryStore::new();
        store.insert("c", cell("c1", "a", 1000.0)).await.unwrap();
        store.insert("c", cell("c2", "b", 500.0)).await.unwrap();

        assert!(matches!(
            store.insert("c", cell("c1", "a", 1.0)).await,
            Err(StorageError::InvalidDocument(_))
        ));

        store.increment("c", "c1", 1000.0, 1).await.unwrap();
        store.increment("c", "missing", 1000.0, 1).await.unwrap();

        let stored = store.find_one("c", "c1").await.unwrap().unwrap();
        assert_eq!(stored.amount, 2000.0);
        assert_eq!(stored.num_entries, 2);

        let fields = vec!["from".to_string()];
        let found = store
            .find("c", &CellFilter::new().cut("from.name", "b"), &fields)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "c2");
        assert!(found[0].dimensions.contains_key("from"));
        assert!(!found[0].dimensions.contains_key("year"));

        let all = store.find("c", &CellFilter::new(), &fields).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);

        assert!(store
            .find("missing", &CellFilter::new(), &fields)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_upsert() {
        let store = MemoryStore::new();
        store.upsert("c", cell("c1", "a", 1000.0)).await.unwrap();
        store.upsert("c", cell("c1", "a", 250.0)).await.unwrap();
        store.upsert("c", cell("c2", "b", 1.0)).await.unwrap();

        let stored = store.find_one("c", "c1").await.unwrap().unwrap();
        assert_eq!(stored.amount, 1250.0);
        assert_eq!(stored.num_entries, 2);
        assert_eq!(store.count("c").await.unwrap(), 2);
    }
}
