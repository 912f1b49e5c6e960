//! Cube queries
//!
//! Answers drilldown queries from the cells of a computed cube. A query runs
//! in five steps:
//!
//! 1. **Slice**: read the cells passing the cuts, projected to the drilldowns
//! 2. **Regroup**: merge cells that agree on every drilldown
//! 3. **Summary**: totals over all groups
//! 4. **Sort**: one stable sort per order key, last key first
//! 5. **Page**: cut the sorted groups into pages of `pagesize`
//!
//! Cubes may be built finer than a query asks for (built on `from, to`,
//! queried on `from`), which is what the regroup step is for.

use crate::config::CubeConfig;
use crate::cube::error::{CubeError, CubeResult};
use crate::cube::Cube;
use crate::storage::{Cell, CellFilter, CubeStore, DimensionValue, Scalar, AMOUNT, NUM_ENTRIES};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// One sort key of a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    /// Dimension path, e.g. `from.name` or `amount`
    pub path: String,
    /// Sort descending
    #[serde(default)]
    pub reverse: bool,
}

impl OrderKey {
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reverse: false,
        }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reverse: true,
        }
    }

    /// Dimension the path starts in
    pub fn dimension(&self) -> &str {
        head(&self.path)
    }
}

/// A drilldown query against one cube
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CubeQuery {
    /// Dimensions to break the result out by; all of the cube's if empty
    #[serde(default)]
    pub drilldowns: Vec<String>,
    /// `(path, value)` pairs; same path OR-ed, different paths AND-ed
    #[serde(default)]
    pub cuts: Vec<(String, Scalar)>,
    #[serde(default = "first_page")]
    pub page: usize,
    /// Falls back to the configured default page size
    #[serde(default)]
    pub pagesize: Option<usize>,
    #[serde(default)]
    pub order: Vec<OrderKey>,
}

fn first_page() -> usize {
    1
}

impl CubeQuery {
    /// Start building a query breaking out `dimensions`
    pub fn drilldown(dimensions: &[&str]) -> CubeQueryBuilder {
        CubeQueryBuilder::new(dimensions)
    }

    /// Start building a query over every dimension of the cube
    pub fn all() -> CubeQueryBuilder {
        CubeQueryBuilder::new(&[])
    }

    /// Dimensions the query touches: drilldowns, cut and order heads
    pub fn referenced_dimensions(&self) -> Vec<String> {
        let mut dimensions: Vec<String> = self
            .drilldowns
            .iter()
            .map(|d| d.to_string())
            .chain(self.cuts.iter().map(|(path, _)| head(path).to_string()))
            .chain(self.order.iter().map(|o| o.dimension().to_string()))
            .filter(|d| d != AMOUNT)
            .collect();
        dimensions.sort();
        dimensions.dedup();
        dimensions
    }
}

/// Builder for cube queries
#[derive(Debug, Clone)]
pub struct CubeQueryBuilder {
    query: CubeQuery,
}

impl CubeQueryBuilder {
    pub fn new(dimensions: &[&str]) -> Self {
        Self {
            query: CubeQuery {
                drilldowns: dimensions.iter().map(|d| d.to_string()).collect(),
                page: first_page(),
                ..Default::default()
            },
        }
    }

    /// Restrict to cells whose `path` equals `value`
    pub fn cut(mut self, path: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.query.cuts.push((path.into(), value.into()));
        self
    }

    /// Add a sort key; earlier keys take precedence
    pub fn order_by(mut self, path: impl Into<String>, reverse: bool) -> Self {
        self.query.order.push(OrderKey {
            path: path.into(),
            reverse,
        });
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.query.page = page;
        self
    }

    pub fn pagesize(mut self, pagesize: usize) -> Self {
        self.query.pagesize = Some(pagesize);
        self
    }

    pub fn build(self) -> CubeQuery {
        self.query
    }
}

/// One group of the result
#[derive(Debug, Clone, PartialEq)]
pub struct DrilldownItem {
    /// Displayed value per drilldown
    pub values: BTreeMap<String, DimensionValue>,
    pub amount: f64,
    pub num_entries: u64,
}

impl DrilldownItem {
    fn from_cell(cell: &Cell, drilldowns: &[String]) -> Self {
        Self {
            values: drilldowns
                .iter()
                .map(|d| {
                    let value = cell.dimensions.get(d).cloned().unwrap_or_else(DimensionValue::null);
                    (d.clone(), value)
                })
                .collect(),
            amount: 0.0,
            num_entries: 0,
        }
    }

    /// Value at a dotted path; `amount` and `num_entries` are the measures
    pub fn get(&self, path: &str) -> Option<DimensionValue> {
        let mut segments = path.split('.');
        match segments.next()? {
            AMOUNT => Some(Scalar::Float(self.amount).into()),
            NUM_ENTRIES => Some(Scalar::Int(self.num_entries as i64).into()),
            dimension => {
                let rest: Vec<&str> = segments.collect();
                self.values.get(dimension)?.lookup(&rest)
            }
        }
    }

    fn sort_value(&self, path: &str) -> Scalar {
        self.get(path)
            .map(|value| value.display_scalar())
            .unwrap_or(Scalar::Null)
    }
}

impl Serialize for DrilldownItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 2))?;
        for (key, value) in &self.values {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry(AMOUNT, &self.amount)?;
        map.serialize_entry(NUM_ENTRIES, &self.num_entries)?;
        map.end()
    }
}

/// Totals of a query, over all groups
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub amount: f64,
    pub num_entries: u64,
    pub num_drilldowns: usize,
    pub page: usize,
    pub pages: usize,
    pub pagesize: usize,
}

/// Result of a cube query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Groups of the requested page
    pub drilldown: Vec<DrilldownItem>,
    pub summary: Summary,
}

/// Reads computed cubes
pub struct CubeQueryEngine {
    store: Arc<dyn CubeStore>,
    config: CubeConfig,
}

impl CubeQueryEngine {
    pub fn new(store: Arc<dyn CubeStore>, config: CubeConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CubeConfig {
        &self.config
    }

    /// Whether the cube's collection exists
    pub async fn is_computed(&self, cube: &Cube) -> CubeResult<bool> {
        Ok(self
            .store
            .collection_names()
            .await?
            .contains(&cube.collection))
    }

    /// Cells passing `cuts`, carrying only the `drilldowns` and the measures
    pub async fn slice(
        &self,
        cube: &Cube,
        cuts: &[(String, Scalar)],
        drilldowns: &[String],
    ) -> CubeResult<Vec<Cell>> {
        let mut filter = CellFilter::new();
        for (path, value) in cuts {
            if !cube.has_dimension(head(path)) {
                return Err(CubeError::UnknownCutDimension {
                    dimension: path.clone(),
                    allowed: cube.dimensions.join(", "),
                });
            }
            filter.add(path.clone(), value.clone());
        }

        Ok(self.store.find(&cube.collection, &filter, drilldowns).await?)
    }

    /// Run `query` against `cube`
    pub async fn query(&self, cube: &Cube, query: &CubeQuery) -> CubeResult<QueryResult> {
        let drilldowns: Vec<String> = if query.drilldowns.is_empty() {
            cube.dimensions.clone()
        } else {
            query.drilldowns.clone()
        };

        if !self.is_computed(cube).await? {
            return Err(CubeError::NotComputed(cube.collection.clone()));
        }
        if let Some(unknown) = drilldowns.iter().find(|d| !cube.has_dimension(d)) {
            return Err(CubeError::UnknownDrilldown {
                dimension: unknown.clone(),
                allowed: cube.dimensions.join(", "),
            });
        }
        if let Some(key) = query
            .order
            .iter()
            .find(|o| o.dimension() != AMOUNT && !drilldowns.iter().any(|d| d == o.dimension()))
        {
            return Err(CubeError::UnknownOrderDimension(key.path.clone()));
        }

        let page = query.page;
        let pagesize = query.pagesize.unwrap_or(self.config.default_pagesize);
        if page == 0 || pagesize == 0 {
            return Err(CubeError::InvalidQuery(format!(
                "page and pagesize must be positive, got page {} and pagesize {}",
                page, pagesize
            )));
        }

        let cells = self.slice(cube, &query.cuts, &drilldowns).await?;
        debug!(
            cube = %cube.collection,
            cells = cells.len(),
            "Regrouping slice"
        );

        let items = sort(regroup(&cells, &drilldowns), &query.order);
        let summary = Summary {
            amount: items.iter().map(|i| i.amount).sum(),
            num_entries: items.iter().map(|i| i.num_entries).sum(),
            num_drilldowns: items.len(),
            page,
            pages: items.len().div_ceil(pagesize),
            pagesize,
        };

        let first = (page - 1).saturating_mul(pagesize);
        let drilldown = items.into_iter().skip(first).take(pagesize).collect();
        Ok(QueryResult { drilldown, summary })
    }
}

/// Merge cells that share a display key over `drilldowns`, in first-seen order
fn regroup(cells: &[Cell], drilldowns: &[String]) -> Vec<DrilldownItem> {
    let mut items: Vec<DrilldownItem> = Vec::new();
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();

    for cell in cells {
        let key: Vec<String> = drilldowns
            .iter()
            .map(|d| group_key(cell.dimensions.get(d)))
            .collect();
        let idx = *index.entry(key).or_insert_with(|| {
            items.push(DrilldownItem::from_cell(cell, drilldowns));
            items.len() - 1
        });
        items[idx].amount += cell.amount;
        items[idx].num_entries += cell.num_entries;
    }
    items
}

/// Grouping key of one value: entity name, date range text, or the whole value
fn group_key(value: Option<&DimensionValue>) -> String {
    let Some(value) = value else {
        return Scalar::Null.to_json().to_string();
    };
    let label = match value {
        DimensionValue::Scalar(s) => return s.to_json().to_string(),
        DimensionValue::Entity(entity) => entity.name.as_deref(),
        DimensionValue::DateRange(range) => range.unparsed.as_deref(),
    };
    match label {
        Some(label) if !label.is_empty() => serde_json::Value::from(label).to_string(),
        _ => value.to_json().to_string(),
    }
}

/// Stable sorts, last key first, so the first key dominates
fn sort(mut items: Vec<DrilldownItem>, order: &[OrderKey]) -> Vec<DrilldownItem> {
    for key in order.iter().rev() {
        let mut keyed: Vec<(Scalar, DrilldownItem)> = items
            .into_iter()
            .map(|item| (item.sort_value(&key.path), item))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            let ordering = a.total_cmp(b);
            if key.reverse {
                ordering.reverse()
            } else {
                ordering
            }
        });
        items = keyed.into_iter().map(|(_, item)| item).collect();
    }
    items
}

fn head(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}
