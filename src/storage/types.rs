//! Core data types for the cube storage layer
//!
//! This module defines the fundamental types shared by the fact side and the
//! cube side of the engine:
//! - `Scalar` and `DimensionValue`: the closed set of dimension value shapes
//! - `EntityRef` and `DateRange`: structured dimension values
//! - `FactRow`: a single source transaction record
//! - `Cell`: one aggregated row of a cube
//! - `CellFilter`: cut criteria evaluated against cells

use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Field name of the measure on fact rows and cells
pub const AMOUNT: &str = "amount";
/// Field name of the running row count on cells
pub const NUM_ENTRIES: &str = "num_entries";
/// Field name holding the owning dataset on fact rows
pub const DATASET: &str = "dataset";

/// A plain dimension value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Build a scalar from a JSON value, if it is not a container
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Scalar::Null),
            Value::Bool(b) => Some(Scalar::Text(b.to_string())),
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => Scalar::Float(n.as_f64().unwrap_or(0.0)),
            }),
            Value::String(s) => Some(Scalar::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Int(i) => Value::from(*i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Scalar::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Canonical text form, used for hashing
    ///
    /// Floats keep their fractional part (`1000.0`) so that they never
    /// collide with the integer of the same magnitude.
    pub fn canonical(&self) -> String {
        match self {
            Scalar::Null => "null".to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => format!("{:?}", f),
            Scalar::Text(s) => s.clone(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Scalar::Null => 0,
            Scalar::Int(_) | Scalar::Float(_) => 1,
            Scalar::Text(_) => 2,
        }
    }

    /// Equality used by cuts: numbers compare by value regardless of width
    pub fn matches(&self, other: &Scalar) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Total order used for sorting: null < numbers < text
    pub fn total_cmp(&self, other: &Scalar) -> Ordering {
        match (self, other) {
            (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => self.rank().cmp(&other.rank()),
            },
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

/// Reference to an entity or classifier (a payer, a recipient, a budget line)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityRef {
    /// Internal id
    pub id: Option<String>,
    pub name: Option<String>,
    pub label: Option<String>,
    pub color: Option<String>,
    pub taxonomy: Option<String>,
    /// Parent reference
    pub parent: Option<String>,
    /// Attributes beyond the ones above; trimmed from cell snapshots
    pub extra: BTreeMap<String, Value>,
}

impl EntityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Builder: set name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder: set label
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builder: set taxonomy
    pub fn taxonomy(mut self, taxonomy: impl Into<String>) -> Self {
        self.taxonomy = Some(taxonomy.into());
        self
    }

    /// Builder: set an extra attribute
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Copy with only the display attributes, and a name that is never empty
    pub fn reduced(&self) -> EntityRef {
        let name = match &self.name {
            Some(name) if !name.is_empty() => Some(name.clone()),
            _ => self.id.clone(),
        };
        EntityRef {
            id: self.id.clone(),
            name,
            label: self.label.clone(),
            color: self.color.clone(),
            taxonomy: self.taxonomy.clone(),
            parent: self.parent.clone(),
            extra: BTreeMap::new(),
        }
    }

    fn from_object(object: &Map<String, Value>) -> Self {
        let text = |key: &str| object.get(key).and_then(json_text);
        let mut entity = EntityRef {
            id: text("_id").or_else(|| text("id")),
            name: text("name"),
            label: text("label"),
            color: text("color"),
            taxonomy: text("taxonomy"),
            parent: text("ref"),
            extra: BTreeMap::new(),
        };
        for (key, value) in object {
            if !matches!(
                key.as_str(),
                "_id" | "id" | "name" | "label" | "color" | "taxonomy" | "ref"
            ) {
                entity.extra.insert(key.clone(), value.clone());
            }
        }
        entity
    }

    fn to_json(&self) -> Value {
        let mut object = Map::new();
        for (key, value) in &self.extra {
            object.insert(key.clone(), value.clone());
        }
        let known = [
            ("id", &self.id),
            ("name", &self.name),
            ("label", &self.label),
            ("color", &self.color),
            ("taxonomy", &self.taxonomy),
            ("ref", &self.parent),
        ];
        for (key, value) in known {
            if let Some(value) = value {
                object.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        Value::Object(object)
    }
}

/// One end of a date range
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatePart {
    /// Four digit year, e.g. `2010`
    pub year: Option<String>,
    /// Year and month, e.g. `2010-03`
    pub month: Option<String>,
    /// Full date, e.g. `2010-03-15`
    pub day: Option<String>,
}

impl DatePart {
    /// Parts of an ISO date (`YYYY`, `YYYY-MM` or `YYYY-MM-DD`)
    pub fn from_iso(date: &str) -> Self {
        DatePart {
            year: date.get(..4).map(str::to_string),
            month: date.get(..7).map(str::to_string),
            day: date.get(..10).map(str::to_string),
        }
    }

    fn from_object(object: &Map<String, Value>) -> Self {
        DatePart {
            year: object.get("year").and_then(json_text),
            month: object.get("month").and_then(json_text),
            day: object.get("day").and_then(json_text),
        }
    }

    fn to_json(&self) -> Value {
        let mut object = Map::new();
        let parts = [("year", &self.year), ("month", &self.month), ("day", &self.day)];
        for (key, value) in parts {
            if let Some(value) = value {
                object.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        Value::Object(object)
    }
}

/// A date range dimension value (the `time` of a spending record)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DateRange {
    pub from: Option<DatePart>,
    pub to: Option<DatePart>,
    /// The original, unparsed date text
    pub unparsed: Option<String>,
}

impl DateRange {
    pub fn new(from: DatePart, to: DatePart) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            unparsed: None,
        }
    }

    /// A range covering a single ISO date
    pub fn on(date: &str) -> Self {
        Self {
            from: Some(DatePart::from_iso(date)),
            to: Some(DatePart::from_iso(date)),
            unparsed: Some(date.to_string()),
        }
    }

    pub fn from_day(&self) -> Option<&str> {
        self.from.as_ref().and_then(|p| p.day.as_deref())
    }

    pub fn to_day(&self) -> Option<&str> {
        self.to.as_ref().and_then(|p| p.day.as_deref())
    }

    fn to_json(&self) -> Value {
        let mut object = Map::new();
        if let Some(from) = &self.from {
            object.insert("from".to_string(), from.to_json());
        }
        if let Some(to) = &self.to {
            object.insert("to".to_string(), to.to_json());
        }
        if let Some(unparsed) = &self.unparsed {
            object.insert("unparsed".to_string(), Value::String(unparsed.clone()));
        }
        Value::Object(object)
    }
}

/// The value of one dimension on a fact row or a cell
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionValue {
    Scalar(Scalar),
    Entity(EntityRef),
    DateRange(DateRange),
}

impl DimensionValue {
    pub fn null() -> Self {
        DimensionValue::Scalar(Scalar::Null)
    }

    /// Classify a document value
    ///
    /// An object with a `from` or `to` sub-object is a date range, any other
    /// object is an entity reference, everything else is a scalar. Arrays
    /// are kept as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(object) => {
                let part = |key: &str| match object.get(key) {
                    Some(Value::Object(inner)) => Some(DatePart::from_object(inner)),
                    _ => None,
                };
                let (from, to) = (part("from"), part("to"));
                if from.is_some() || to.is_some() {
                    DimensionValue::DateRange(DateRange {
                        from,
                        to,
                        unparsed: object.get("unparsed").and_then(json_text),
                    })
                } else {
                    DimensionValue::Entity(EntityRef::from_object(object))
                }
            }
            Value::Array(_) => DimensionValue::Scalar(Scalar::Text(value.to_string())),
            other => DimensionValue::Scalar(Scalar::from_json(other).unwrap_or(Scalar::Null)),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            DimensionValue::Scalar(s) => s.to_json(),
            DimensionValue::Entity(e) => e.to_json(),
            DimensionValue::DateRange(d) => d.to_json(),
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            DimensionValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Scalar standing in for this value when sorting or displaying
    ///
    /// Entities are represented by their name (falling back to the id),
    /// date ranges by their unparsed text.
    pub fn display_scalar(&self) -> Scalar {
        match self {
            DimensionValue::Scalar(s) => s.clone(),
            DimensionValue::Entity(e) => e
                .name
                .clone()
                .or_else(|| e.id.clone())
                .map(Scalar::Text)
                .unwrap_or(Scalar::Null),
            DimensionValue::DateRange(d) => {
                d.unparsed.clone().map(Scalar::Text).unwrap_or(Scalar::Null)
            }
        }
    }

    /// Scalars a cut value is compared against
    fn cut_candidates(&self) -> Vec<Scalar> {
        match self {
            DimensionValue::Scalar(s) => vec![s.clone()],
            DimensionValue::Entity(e) => [&e.name, &e.id]
                .into_iter()
                .flatten()
                .map(|s| Scalar::Text(s.clone()))
                .collect(),
            DimensionValue::DateRange(d) => {
                d.unparsed.iter().map(|s| Scalar::Text(s.clone())).collect()
            }
        }
    }

    /// Walk a dotted sub-path (`name`, `from.year`) into a structured value
    pub fn lookup(&self, path: &[&str]) -> Option<DimensionValue> {
        if path.is_empty() {
            return Some(self.clone());
        }
        let mut current = self.to_json();
        for segment in path {
            current = match current {
                Value::Object(mut object) => object.remove(*segment)?,
                _ => return None,
            };
        }
        Some(DimensionValue::from_json(&current))
    }
}

impl Serialize for DimensionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DimensionValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(DimensionValue::from_json(&value))
    }
}

impl From<Scalar> for DimensionValue {
    fn from(value: Scalar) -> Self {
        DimensionValue::Scalar(value)
    }
}

impl From<&str> for DimensionValue {
    fn from(value: &str) -> Self {
        DimensionValue::Scalar(value.into())
    }
}

impl From<String> for DimensionValue {
    fn from(value: String) -> Self {
        DimensionValue::Scalar(value.into())
    }
}

impl From<i64> for DimensionValue {
    fn from(value: i64) -> Self {
        DimensionValue::Scalar(value.into())
    }
}

impl From<f64> for DimensionValue {
    fn from(value: f64) -> Self {
        DimensionValue::Scalar(value.into())
    }
}

impl From<EntityRef> for DimensionValue {
    fn from(value: EntityRef) -> Self {
        DimensionValue::Entity(value)
    }
}

impl From<DateRange> for DimensionValue {
    fn from(value: DateRange) -> Self {
        DimensionValue::DateRange(value)
    }
}

/// A single source transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    /// Name of the owning dataset
    pub dataset: String,
    /// Dimension values keyed by field name
    #[serde(default)]
    pub fields: BTreeMap<String, DimensionValue>,
    /// The measure; a missing amount counts as 0.0
    #[serde(default)]
    pub amount: Option<f64>,
}

impl FactRow {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            fields: BTreeMap::new(),
            amount: None,
        }
    }

    /// Builder: set a field
    pub fn field(mut self, key: impl Into<String>, value: impl Into<DimensionValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Builder: set the amount
    pub fn amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Parse a flat document (`{"dataset": .., "amount": .., "from": {..}}`)
    pub fn from_document(document: &Value) -> StorageResult<Self> {
        let object = document.as_object().ok_or_else(|| {
            StorageError::InvalidDocument(format!("fact row must be an object, got {}", document))
        })?;

        let dataset = match object.get(DATASET).map(DimensionValue::from_json) {
            Some(DimensionValue::Scalar(Scalar::Text(name))) => name,
            Some(DimensionValue::Entity(entity)) => entity
                .name
                .or(entity.id)
                .ok_or_else(|| StorageError::InvalidDocument("dataset has no name".into()))?,
            _ => {
                return Err(StorageError::InvalidDocument(
                    "fact row has no dataset".into(),
                ))
            }
        };

        let amount = match object.get(AMOUNT) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => Some(s.trim().parse::<f64>().map_err(|_| {
                StorageError::InvalidDocument(format!("amount is not numeric: {:?}", s))
            })?),
            Some(other) => {
                return Err(StorageError::InvalidDocument(format!(
                    "amount is not numeric: {}",
                    other
                )))
            }
        };

        let fields = object
            .iter()
            .filter(|(key, _)| key.as_str() != AMOUNT)
            .map(|(key, value)| (key.clone(), DimensionValue::from_json(value)))
            .collect();

        Ok(Self {
            dataset,
            fields,
            amount,
        })
    }

    /// Value at a dotted path (`time.from.year`)
    pub fn get(&self, path: &str) -> Option<DimensionValue> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        let rest: Vec<&str> = segments.collect();
        self.fields.get(head)?.lookup(&rest)
    }

    /// Copy carrying only the given fields, plus the dataset
    pub fn project(&self, fields: &BTreeSet<String>) -> FactRow {
        FactRow {
            dataset: self.dataset.clone(),
            fields: self
                .fields
                .iter()
                .filter(|(key, _)| fields.contains(key.as_str()) || key.as_str() == DATASET)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            amount: self.amount,
        }
    }
}

/// One aggregated row of a cube
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Hash over the cell's dimension values
    #[serde(rename = "_id")]
    pub id: String,
    /// Reduced value snapshot per dimension
    pub dimensions: BTreeMap<String, DimensionValue>,
    /// Running sum of the measure
    pub amount: f64,
    /// Running count of aggregated fact rows
    pub num_entries: u64,
}

impl Cell {
    /// A fresh cell holding a single fact row
    pub fn new(id: impl Into<String>, dimensions: BTreeMap<String, DimensionValue>, amount: f64) -> Self {
        Self {
            id: id.into(),
            dimensions,
            amount,
            num_entries: 1,
        }
    }

    /// Value at a dotted path; `amount` and `num_entries` resolve to the measures
    pub fn get(&self, path: &str) -> Option<DimensionValue> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        match head {
            AMOUNT => Some(Scalar::Float(self.amount).into()),
            NUM_ENTRIES => Some(Scalar::Int(self.num_entries as i64).into()),
            _ => {
                let rest: Vec<&str> = segments.collect();
                self.dimensions.get(head)?.lookup(&rest)
            }
        }
    }

    /// Copy carrying only the given dimensions
    pub fn project(&self, fields: &[String]) -> Cell {
        Cell {
            id: self.id.clone(),
            dimensions: fields
                .iter()
                .filter_map(|f| self.dimensions.get(f).map(|v| (f.clone(), v.clone())))
                .collect(),
            amount: self.amount,
            num_entries: self.num_entries,
        }
    }
}

/// Cut criteria over cells
///
/// Values given for the same path are alternatives (OR), different paths
/// must all match (AND).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellFilter {
    clauses: BTreeMap<String, Vec<Scalar>>,
}

impl CellFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: accept `value` for `path`
    pub fn cut(mut self, path: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.add(path, value);
        self
    }

    pub fn add(&mut self, path: impl Into<String>, value: impl Into<Scalar>) {
        self.clauses.entry(path.into()).or_default().push(value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Paths this filter constrains
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.clauses.keys().map(String::as_str)
    }

    /// Check whether a cell passes every clause
    pub fn matches(&self, cell: &Cell) -> bool {
        self.clauses.iter().all(|(path, accepted)| {
            let candidates = match cell.get(path) {
                Some(value) => value.cut_candidates(),
                None => vec![Scalar::Null],
            };
            candidates
                .iter()
                .any(|candidate| accepted.iter().any(|value| candidate.matches(value)))
        })
    }
}

fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_documents() {
        let entity = DimensionValue::from_json(&json!({"_id": "e1", "name": "a", "extra": 1}));
        match entity {
            DimensionValue::Entity(e) => {
                assert_eq!(e.id.as_deref(), Some("e1"));
                assert_eq!(e.name.as_deref(), Some("a"));
                assert_eq!(e.extra.get("extra"), Some(&json!(1)));
            }
            other => panic!("expected entity, got {:?}", other),
        }

        let range = DimensionValue::from_json(&json!({
            "from": {"year": 2010, "month": "2010-03", "day": "2010-03-01"},
            "to": {"day": "2010-03-31"},
            "unparsed": "2010-03"
        }));
        match range {
            DimensionValue::DateRange(d) => {
                assert_eq!(d.from_day(), Some("2010-03-01"));
                assert_eq!(d.to_day(), Some("2010-03-31"));
                assert_eq!(d.from.unwrap().year.as_deref(), Some("2010"));
            }
            other => panic!("expected date range, got {:?}", other),
        }

        assert_eq!(
            DimensionValue::from_json(&json!(12)),
            DimensionValue::Scalar(Scalar::Int(12))
        );
        assert_eq!(DimensionValue::from_json(&json!(null)), DimensionValue::null());
    }

    #[test]
    fn test_entity_reduction_backfills_name() {
        let entity = EntityRef::new("e1").attr("description", "long text");
        let reduced = entity.reduced();
        assert_eq!(reduced.name.as_deref(), Some("e1"));
        assert!(reduced.extra.is_empty());

        let named = EntityRef::new("e2").name("Ministry").reduced();
        assert_eq!(named.name.as_deref(), Some("Ministry"));
    }

    #[test]
    fn test_dimension_value_serialization() {
        let value: DimensionValue = EntityRef::new("e1").name("a").label("A").into();
        let json = serde_json::to_string(&value).unwrap();
        let restored: DimensionValue = serde_json::from_str(&json).unwrap();
        assert_eq!(value, restored);

        let range: DimensionValue = DateRange::on("2011-05-02").into();
        let json = serde_json::to_string(&range).unwrap();
        let restored: DimensionValue = serde_json::from_str(&json).unwrap();
        assert_eq!(range, restored);
    }

    #[test]
    fn test_fact_row_from_document() {
        let row = FactRow::from_document(&json!({
            "dataset": {"_id": "ds1", "name": "cra"},
            "amount": "1500.5",
            "from": {"_id": "e1", "name": "a"},
            "time": {"from": {"year": "2010"}, "to": {"year": "2010"}}
        }))
        .unwrap();

        assert_eq!(row.dataset, "cra");
        assert_eq!(row.amount, Some(1500.5));
        assert_eq!(
            row.get("time.from.year"),
            Some(DimensionValue::Scalar(Scalar::Text("2010".into())))
        );
        assert_eq!(
            row.get("from.name"),
            Some(DimensionValue::Scalar(Scalar::Text("a".into())))
        );
        assert!(row.get("to").is_none());
    }

    #[test]
    fn test_fact_row_rejects_bad_amount() {
        let result = FactRow::from_document(&json!({"dataset": "cra", "amount": "lots"}));
        assert!(matches!(result, Err(StorageError::InvalidDocument(_))));

        let result = FactRow::from_document(&json!({"amount": 1}));
        assert!(matches!(result, Err(StorageError::InvalidDocument(_))));
    }

    #[test]
    fn test_fact_row_projection_keeps_dataset() {
        let row = FactRow::new("cra")
            .field("dataset", "cra")
            .field("from", EntityRef::new("e1"))
            .field("unrelated", "x")
            .amount(10.0);
        let fields: BTreeSet<String> = ["from".to_string()].into_iter().collect();
        let projected = row.project(&fields);

        assert!(projected.fields.contains_key("from"));
        assert!(projected.fields.contains_key("dataset"));
        assert!(!projected.fields.contains_key("unrelated"));
        assert_eq!(projected.amount, Some(10.0));
    }

    #[test]
    fn test_scalar_ordering() {
        let mut values = vec![
            Scalar::Text("b".into()),
            Scalar::Int(3),
            Scalar::Null,
            Scalar::Float(2.5),
            Scalar::Text("a".into()),
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(
            values,
            vec![
                Scalar::Null,
                Scalar::Float(2.5),
                Scalar::Int(3),
                Scalar::Text("a".into()),
                Scalar::Text("b".into()),
            ]
        );
        assert!(Scalar::Int(2010).matches(&Scalar::Float(2010.0)));
        assert!(!Scalar::Int(2010).matches(&Scalar::Text("2010".into())));
    }

    #[test]
    fn test_cell_filter() {
        let mut dims = BTreeMap::new();
        dims.insert("from".to_string(), EntityRef::new("e1").name("a").into());
        dims.insert("year".to_string(), DimensionValue::from(2010i64));
        let cell = Cell::new("c1", dims, 10.0);

        assert!(CellFilter::new().matches(&cell));
        assert!(CellFilter::new().cut("from.name", "a").matches(&cell));
        assert!(CellFilter::new().cut("from", "e1").matches(&cell));
        assert!(CellFilter::new()
            .cut("from.name", "x")
            .cut("from.name", "a")
            .matches(&cell));
        assert!(!CellFilter::new()
            .cut("from.name", "a")
            .cut("year", 2011i64)
            .matches(&cell));
        assert!(CellFilter::new().cut("year", 2010i64).matches(&cell));
    }
}
