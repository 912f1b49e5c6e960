//! Fact sources
//!
//! A [`FactSource`] streams the fact rows of one dataset, already projected
//! to the fields a cube build needs. Every call to `scan` starts over from
//! the first row; sources are never written to by the engine.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::FactRow;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

/// Stream of projected fact rows
pub type FactStream<'a> = BoxStream<'a, StorageResult<FactRow>>;

/// Read access to the fact rows of datasets
pub trait FactSource: Send + Sync {
    /// Rows of `dataset`, each carrying only `fields`, the dataset and the amount
    fn scan<'a>(&'a self, dataset: &str, fields: &BTreeSet<String>) -> FactStream<'a>;
}

/// Fact rows held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryFactSource {
    rows: Vec<FactRow>,
}

impl MemoryFactSource {
    pub fn new(rows: Vec<FactRow>) -> Self {
        Self { rows }
    }

    pub fn push(&mut self, row: FactRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl FactSource for MemoryFactSource {
    fn scan<'a>(&'a self, dataset: &str, fields: &BTreeSet<String>) -> FactStream<'a> {
        let dataset = dataset.to_string();
        let fields = fields.clone();
        stream::iter(
            self.rows
                .iter()
                .filter(move |row| row.dataset == dataset)
                .map(move |row| Ok(row.project(&fields))),
        )
        .boxed()
    }
}

/// Fact rows read from a file with one JSON document per line
///
/// Blank lines are skipped. A line that is not a valid fact document ends
/// the stream with an error.
#[derive(Debug, Clone)]
pub struct JsonLinesFactSource {
    path: PathBuf,
}

enum ScanState {
    Pending(PathBuf),
    Reading(Lines<BufReader<File>>),
    Done,
}

impl JsonLinesFactSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FactSource for JsonLinesFactSource {
    fn scan<'a>(&'a self, dataset: &str, fields: &BTreeSet<String>) -> FactStream<'a> {
        let dataset = dataset.to_string();
        let fields = fields.clone();

        stream::unfold(ScanState::Pending(self.path.clone()), move |state| {
            let dataset = dataset.clone();
            let fields = fields.clone();
            async move {
                let mut lines = match state {
                    ScanState::Pending(path) => match File::open(&path).await {
                        Ok(file) => BufReader::new(file).lines(),
                        Err(e) => return Some((Err(StorageError::Io(e)), ScanState::Done)),
                    },
                    ScanState::Reading(lines) => lines,
                    ScanState::Done => return None,
                };

                loop {
                    let line = match lines.next_line().await {
                        Ok(Some(line)) => line,
                        Ok(None) => return None,
                        Err(e) => return Some((Err(StorageError::Io(e)), ScanState::Done)),
                    };
                    if line.trim().is_empty() {
                        continue;
                    }

                    let row = serde_json::from_str::<Value>(&line)
                        .map_err(StorageError::from)
                        .and_then(|doc| FactRow::from_document(&doc));
                    match row {
                        Ok(row) if row.dataset != dataset => continue,
                        Ok(row) => {
                            return Some((Ok(row.project(&fields)), ScanState::Reading(lines)))
                        }
                        Err(e) => return Some((Err(e), ScanState::Done)),
                    }
                }
            }
        })
        .boxed()
    }
}
