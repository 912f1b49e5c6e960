//! Cell identity and snapshots
//!
//! A [`CellKeyBuilder`] is derived from a cube's dimension set. It knows
//! which fact fields a build has to fetch and turns every fact row into the
//! cell that row belongs to: a stable `cell_id` plus the reduced dimension
//! values stored on the cell.
//!
//! # Cell ids
//!
//! Each dimension contributes one or more key components, taken in sorted
//! dimension order:
//! - `year`/`month`: the integer year and month of `time.from`
//! - a date range with a `from.day`: the `from.day` and `to.day` dates
//! - an entity: its id, else its name
//! - a scalar: the value itself
//!
//! Every component is hashed on its own (SHA-1, lowercase hex) and the
//! concatenated digests are hashed once more. Two rows that agree on the
//! cube's dimensions always land in the same cell, whatever else they carry.

use crate::cube::error::{CubeError, CubeResult};
use crate::storage::{Cell, DimensionValue, FactRow, Scalar};
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, BTreeSet};

/// Derived dimension: year of `time.from`
pub const YEAR: &str = "year";
/// Derived dimension: month of `time.from`
pub const MONTH: &str = "month";
/// Fact field the derived dimensions are read from
pub const TIME: &str = "time";

/// SHA-1 over the concatenated SHA-1 hex digests of `values`
pub fn hash_values<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut outer = Sha1::new();
    for value in values {
        let mut inner = Sha1::new();
        inner.update(value.as_ref().as_bytes());
        outer.update(format!("{:x}", inner.finalize()).as_bytes());
    }
    format!("{:x}", outer.finalize())
}

/// Maps fact rows of one cube onto cells
#[derive(Debug, Clone)]
pub struct CellKeyBuilder {
    fetch: Vec<String>,
    year: bool,
    month: bool,
}

impl CellKeyBuilder {
    pub fn new<S: AsRef<str>>(dimensions: &[S]) -> Self {
        let mut fetch = BTreeSet::new();
        let (mut year, mut month) = (false, false);
        for dimension in dimensions {
            match dimension.as_ref() {
                YEAR => year = true,
                MONTH => month = true,
                other => {
                    fetch.insert(other.to_string());
                }
            }
        }
        if year || month {
            fetch.insert(TIME.to_string());
        }

        Self {
            fetch: fetch.into_iter().collect(),
            year,
            month,
        }
    }

    /// Fact fields a build fetches, sorted; `time` stands in for year/month
    pub fn fetch_fields(&self) -> &[String] {
        &self.fetch
    }

    /// Canonical text of every key component of `row`
    pub fn components(&self, row: &FactRow) -> CubeResult<Vec<String>> {
        let mut components = Vec::with_capacity(self.fetch.len() + 1);
        for field in &self.fetch {
            if field == TIME && (self.year || self.month) {
                let (year, month) = self.time_parts(row)?;
                components.extend(year.map(|y| y.to_string()));
                components.extend(month.map(|m| m.to_string()));
                continue;
            }

            match row.get(field) {
                Some(DimensionValue::DateRange(range)) => match range.from_day() {
                    Some(from_day) => {
                        components.push(from_day.to_string());
                        components.push(
                            range
                                .to_day()
                                .map(str::to_string)
                                .unwrap_or_else(|| Scalar::Null.canonical()),
                        );
                    }
                    None => components.push(match &range.unparsed {
                        Some(unparsed) => unparsed.clone(),
                        None => DimensionValue::DateRange(range.clone()).to_json().to_string(),
                    }),
                },
                Some(DimensionValue::Entity(entity)) => {
                    components.push(match entity.id.as_ref().or(entity.name.as_ref()) {
                        Some(key) => key.clone(),
                        None => DimensionValue::Entity(entity.clone()).to_json().to_string(),
                    })
                }
                Some(DimensionValue::Scalar(scalar)) => components.push(scalar.canonical()),
                None => components.push(Scalar::Null.canonical()),
            }
        }
        Ok(components)
    }

    /// Identity of the cell `row` belongs to
    pub fn cell_id(&self, row: &FactRow) -> CubeResult<String> {
        Ok(hash_values(self.components(row)?))
    }

    /// Reduced dimension values stored on a new cell
    pub fn snapshot(&self, row: &FactRow) -> CubeResult<BTreeMap<String, DimensionValue>> {
        let mut snapshot = BTreeMap::new();
        for field in &self.fetch {
            if field == TIME && (self.year || self.month) {
                let (year, month) = self.time_parts(row)?;
                if let Some(year) = year {
                    snapshot.insert(YEAR.to_string(), Scalar::Int(year).into());
                }
                if let Some(month) = month {
                    snapshot.insert(MONTH.to_string(), Scalar::Int(month).into());
                }
                continue;
            }

            let value = match row.get(field) {
                Some(DimensionValue::Entity(entity)) => DimensionValue::Entity(entity.reduced()),
                Some(other) => other,
                None => DimensionValue::null(),
            };
            snapshot.insert(field.clone(), value);
        }
        Ok(snapshot)
    }

    /// A fresh cell holding `row` alone
    pub fn cell(&self, row: &FactRow) -> CubeResult<Cell> {
        let id = self.cell_id(row)?;
        let snapshot = self.snapshot(row)?;
        Ok(Cell::new(id, snapshot, row.amount.unwrap_or(0.0)))
    }

    fn time_parts(&self, row: &FactRow) -> CubeResult<(Option<i64>, Option<i64>)> {
        let year = if self.year {
            Some(parse_time_part(row, "time.from.year", false)?)
        } else {
            None
        };
        let month = if self.month {
            Some(parse_time_part(row, "time.from.month", true)?)
        } else {
            None
        };
        Ok((year, month))
    }
}

/// Integer at `path`; `tail` reads the last two characters (`2010-03` -> 3)
fn parse_time_part(row: &FactRow, path: &str, tail: bool) -> CubeResult<i64> {
    let text = match row.get(path) {
        Some(DimensionValue::Scalar(Scalar::Int(i))) if !tail => return Ok(i),
        Some(DimensionValue::Scalar(scalar)) if !scalar.is_null() => scalar.canonical(),
        _ => {
            return Err(CubeError::InvalidFact(format!(
                "fact row of dataset '{}' has no {}",
                row.dataset, path
            )))
        }
    };
    let text = whole_number(&text);

    let digits = if tail {
        let start = text
            .char_indices()
            .rev()
            .nth(1)
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        &text[start..]
    } else {
        text
    };

    digits.trim().parse::<i64>().map_err(|_| {
        CubeError::InvalidFact(format!("{} is not a number: {:?}", path, text))
    })
}

/// Drops the `.0` of a whole JSON float (`2010.0` -> `2010`)
fn whole_number(text: &str) -> &str {
    match text.strip_suffix(".0") {
        Some(int) if !int.is_empty() && int.bytes().all(|b| b.is_ascii_digit()) => int,
        _ => text,
    }
}
