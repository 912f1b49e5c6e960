//! SQLite cell store
//!
//! Every collection lives in one `cells` table keyed by
//! `(collection, cell_id)`; dimension snapshots are stored as JSON text.
//! Upserts are a single `INSERT ... ON CONFLICT DO UPDATE`, so folding a
//! fact row into its cell never races with itself.
//!
//! # Layout
//! - `collections(name)`: every existing collection, including empty ones
//! - `cells(collection, cell_id, dimensions, amount, num_entries)`

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::store::CubeStore;
use crate::storage::types::{Cell, CellFilter, DimensionValue};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS collections (
        name TEXT PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS cells (
        collection TEXT NOT NULL,
        cell_id TEXT NOT NULL,
        dimensions TEXT NOT NULL,
        amount REAL NOT NULL,
        num_entries INTEGER NOT NULL,
        PRIMARY KEY (collection, cell_id)
    );
";

/// SQLite-backed cell store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Create or open the store at `data_dir/cubes.db`
    pub fn open(data_dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("cubes.db");

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = 10000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        Self::init(conn, Some(path))
    }

    /// A throwaway store that lives only as long as this handle
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file, if this store is backed by one
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }

    fn register(conn: &Connection, collection: &str) -> StorageResult<()> {
        conn.prepare_cached("INSERT OR IGNORE INTO collections (name) VALUES (?1)")?
            .execute(params![collection])?;
        Ok(())
    }

    fn row_to_cell(
        cell_id: String,
        dimensions: String,
        amount: f64,
        num_entries: i64,
    ) -> StorageResult<Cell> {
        let dimensions: BTreeMap<String, DimensionValue> = serde_json::from_str(&dimensions)?;
        Ok(Cell {
            id: cell_id,
            dimensions,
            amount,
            num_entries: num_entries.max(0) as u64,
        })
    }
}

#[async_trait]
impl CubeStore for SqliteStore {
    async fn collection_names(&self) -> StorageResult<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT name FROM collections")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(names)
    }

    async fn create_collection(&self, name: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        Self::register(&conn, name)
    }

    async fn drop_collection(&self, name: &str) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cells WHERE collection = ?1", params![name])?;
        tx.execute("DELETE FROM collections WHERE name = ?1", params![name])?;
        tx.commit()?;
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &CellFilter,
        fields: &[String],
    ) -> StorageResult<Vec<Cell>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT cell_id, dimensions, amount, num_entries FROM cells
             WHERE collection = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut cells = Vec::new();
        for row in rows {
            let (cell_id, dimensions, amount, num_entries) = row?;
            let cell = Self::row_to_cell(cell_id, dimensions, amount, num_entries)?;
            if filter.matches(&cell) {
                cells.push(cell.project(fields));
            }
        }
        Ok(cells)
    }

    async fn find_one(&self, collection: &str, cell_id: &str) -> StorageResult<Option<Cell>> {
        let conn = self.conn()?;
        let row = conn
            .prepare_cached(
                "SELECT dimensions, amount, num_entries FROM cells
                 WHERE collection = ?1 AND cell_id = ?2",
            )?
            .query_row(params![collection, cell_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .optional()?;

        row.map(|(dimensions, amount, num_entries)| {
            Self::row_to_cell(cell_id.to_string(), dimensions, amount, num_entries)
        })
        .transpose()
    }

    async fn insert(&self, collection: &str, cell: Cell) -> StorageResult<()> {
        let dimensions = serde_json::to_string(&cell.dimensions)?;
        let conn = self.conn()?;
        Self::register(&conn, collection)?;
        conn.prepare_cached(
            "INSERT INTO cells (collection, cell_id, dimensions, amount, num_entries)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?
        .execute(params![
            collection,
            cell.id,
            dimensions,
            cell.amount,
            cell.num_entries as i64
        ])?;
        Ok(())
    }

    async fn increment(
        &self,
        collection: &str,
        cell_id: &str,
        amount: f64,
        num_entries: u64,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.prepare_cached(
            "UPDATE cells SET amount = amount + ?3, num_entries = num_entries + ?4
             WHERE collection = ?1 AND cell_id = ?2",
        )?
        .execute(params![collection, cell_id, amount, num_entries as i64])?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, cell: Cell) -> StorageResult<()> {
        let dimensions = serde_json::to_string(&cell.dimensions)?;
        let conn = self.conn()?;
        Self::register(&conn, collection)?;
        conn.prepare_cached(
            "INSERT INTO cells (collection, cell_id, dimensions, amount, num_entries)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(collection, cell_id) DO UPDATE SET
                amount = amount + excluded.amount,
                num_entries = num_entries + excluded.num_entries",
        )?
        .execute(params![
            collection,
            cell.id,
            dimensions,
            cell.amount,
            cell.num_entries as i64
        ])?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn
            .prepare_cached("SELECT COUNT(*) FROM cells WHERE collection = ?1")?
            .query_row(params![collection], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}
