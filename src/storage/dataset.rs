//! Dataset metadata and its cube registry
//!
//! A dataset names a collection of fact rows and carries the registry of
//! cubes defined over it. The registry is persisted through a
//! [`DatasetRepository`]; [`JsonDatasetRepository`] keeps every dataset in a
//! single JSON file.

use crate::storage::error::{StorageError, StorageResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Finest date granularity of a dataset's time axis
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TimeAxis {
    #[default]
    #[serde(rename = "time.from.year")]
    Year,
    #[serde(rename = "time.from.month")]
    Month,
    #[serde(rename = "time.from.day")]
    Day,
}

impl TimeAxis {
    /// Whether cubes over this dataset should break out months
    pub fn has_months(&self) -> bool {
        matches!(self, TimeAxis::Month | TimeAxis::Day)
    }
}

impl std::str::FromStr for TimeAxis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "year" | "time.from.year" => Ok(TimeAxis::Year),
            "month" | "time.from.month" => Ok(TimeAxis::Month),
            "day" | "time.from.day" => Ok(TimeAxis::Day),
            other => Err(format!("unknown time axis: {}", other)),
        }
    }
}

/// Registry entry for one cube
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CubeDescription {
    /// Dimensions the cube aggregates over, sorted
    pub dimensions: Vec<String>,
    /// Cell count after the last successful build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_cells: Option<u64>,
}

impl CubeDescription {
    pub fn new<I, S>(dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dimensions: Vec<String> = dimensions.into_iter().map(Into::into).collect();
        dimensions.sort();
        dimensions.dedup();
        Self {
            dimensions,
            num_cells: None,
        }
    }

    /// Check if this cube covers every given dimension
    pub fn covers<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required
            .iter()
            .all(|d| self.dimensions.iter().any(|own| own == d.as_ref()))
    }
}

/// A fact table and the cubes defined over it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    /// Unique name; also part of cube collection names
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub time_axis: TimeAxis,
    /// Declared dimension keys of the fact rows
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub cubes: BTreeMap<String, CubeDescription>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            time_axis: TimeAxis::default(),
            dimensions: Vec::new(),
            cubes: BTreeMap::new(),
        }
    }

    /// Builder: set label
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builder: set time axis
    pub fn time_axis(mut self, axis: TimeAxis) -> Self {
        self.time_axis = axis;
        self
    }

    /// Builder: declare a dimension key
    pub fn dimension(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.dimensions.contains(&key) {
            self.dimensions.push(key);
        }
        self
    }

    pub fn cube(&self, name: &str) -> Option<&CubeDescription> {
        self.cubes.get(name)
    }
}

/// Durable storage for dataset metadata
#[async_trait]
pub trait DatasetRepository: Send + Sync {
    /// Persist a dataset, including its cube registry
    async fn save(&self, dataset: &Dataset) -> StorageResult<()>;

    /// Load a dataset by name
    async fn load(&self, name: &str) -> StorageResult<Dataset>;

    /// Names of all known datasets
    async fn names(&self) -> StorageResult<Vec<String>>;
}

/// Dataset registry persisted as one JSON file
pub struct JsonDatasetRepository {
    path: PathBuf,
    datasets: RwLock<HashMap<String, Dataset>>,
}

impl JsonDatasetRepository {
    /// Open the registry at `path`, loading it if the file exists
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let datasets = Self::read_file(&path)?;
        Ok(Self {
            path,
            datasets: RwLock::new(datasets),
        })
    }

    fn read_file(path: &Path) -> StorageResult<HashMap<String, Dataset>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let content = std::fs::read_to_string(path)?;
        let datasets: Vec<Dataset> = serde_json::from_str(&content)?;
        Ok(datasets.into_iter().map(|d| (d.name.clone(), d)).collect())
    }

    fn write_file(&self, datasets: &HashMap<String, Dataset>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut all: Vec<&Dataset> = datasets.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        let content = serde_json::to_string_pretty(&all)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DatasetRepository for JsonDatasetRepository {
    async fn save(&self, dataset: &Dataset) -> StorageResult<()> {
        let mut datasets = self.datasets.write().await;
        datasets.insert(dataset.name.clone(), dataset.clone());
        self.write_file(&datasets)
    }

    async fn load(&self, name: &str) -> StorageResult<Dataset> {
        let datasets = self.datasets.read().await;
        datasets
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::DatasetNotFound(name.to_string()))
    }

    async fn names(&self) -> StorageResult<Vec<String>> {
        let datasets = self.datasets.read().await;
        let mut names: Vec<String> = datasets.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_time_axis_serialization() {
        let json = serde_json::to_string(&TimeAxis::Month).unwrap();
        assert_eq!(json, "\"time.from.month\"");
        assert!(TimeAxis::Day.has_months());
        assert!(!TimeAxis::Year.has_months());
        assert_eq!("month".parse::<TimeAxis>(), Ok(TimeAxis::Month));
        assert!("week".parse::<TimeAxis>().is_err());
    }

    #[test]
    fn test_cube_description_covers() {
        let description = CubeDescription::new(["to", "from", "year", "from"]);
        assert_eq!(description.dimensions, vec!["from", "to", "year"]);
        assert!(description.covers(&["from", "year"]));
        assert!(description.covers::<&str>(&[]));
        assert!(!description.covers(&["month"]));
    }

    #[test]
    fn test_dataset_builder() {
        let dataset = Dataset::new("cra")
            .label("Country Regional Analysis")
            .time_axis(TimeAxis::Month)
            .dimension("cofog1")
            .dimension("cofog1");
        assert_eq!(dataset.dimensions, vec!["cofog1"]);
        assert!(dataset.cube("default").is_none());
    }

    #[tokio::test]
    async fn test_repository_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta").join("datasets.json");

        {
            let repo = JsonDatasetRepository::open(&path).unwrap();
            let mut dataset = Dataset::new("cra").dimension("cofog1");
            dataset
                .cubes
                .insert("default".to_string(), CubeDescription::new(["from", "to"]));
            repo.save(&dataset).await.unwrap();
        }

        let repo = JsonDatasetRepository::open(&path).unwrap();
        let dataset = repo.load("cra").await.unwrap();
        assert_eq!(dataset.dimensions, vec!["cofog1"]);
        assert_eq!(
            dataset.cube("default").map(|c| c.dimensions.clone()),
            Some(vec!["from".to_string(), "to".to_string()])
        );
        assert_eq!(repo.names().await.unwrap(), vec!["cra"]);
        assert!(matches!(
            repo.load("missing").await,
            Err(StorageError::DatasetNotFound(_))
        ));
    }
}
