//! Frame types for the live channel pipeline
//!
//! A [`Frame`] is the structured unit flowing between stages: an ordered set
//! of uniquely named, equal-length field columns. Frames are immutable once
//! built; processors derive new frames instead of editing in place.
//!
//! ## Wire format
//!
//! ```json
//! {
//!   "name": "cpu",
//!   "fields": [
//!     {"name": "time", "type": "time", "values": [1700000000000]},
//!     {"name": "usage", "type": "number", "values": [12.5]}
//!   ]
//! }
//! ```
//!
//! Time values are epoch milliseconds; RFC 3339 strings are accepted on input.

use crate::error::{PipelineError, Result};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Column value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    String,
    #[serde(alias = "bool")]
    Boolean,
    Time,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Time => "time",
        };
        f.write_str(name)
    }
}

/// Typed column of nullable values
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValues {
    Number(Vec<Option<f64>>),
    String(Vec<Option<String>>),
    Boolean(Vec<Option<bool>>),
    Time(Vec<Option<DateTime<Utc>>>),
}

impl FieldValues {
    /// Column of `len` nulls
    pub fn nulls(field_type: FieldType, len: usize) -> Self {
        match field_type {
            FieldType::Number => Self::Number(vec![None; len]),
            FieldType::String => Self::String(vec![None; len]),
            FieldType::Boolean => Self::Boolean(vec![None; len]),
            FieldType::Time => Self::Time(vec![None; len]),
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Number(_) => FieldType::Number,
            Self::String(_) => FieldType::String,
            Self::Boolean(_) => FieldType::Boolean,
            Self::Time(_) => FieldType::Time,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Number(v) => v.len(),
            Self::String(v) => v.len(),
            Self::Boolean(v) => v.len(),
            Self::Time(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index` as JSON (`Null` for nulls and out-of-range)
    pub fn get(&self, index: usize) -> Value {
        match self {
            Self::Number(v) => v
                .get(index)
                .copied()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::String(v) => v
                .get(index)
                .cloned()
                .flatten()
                .map(Value::String)
                .unwrap_or(Value::Null),
            Self::Boolean(v) => v
                .get(index)
                .copied()
                .flatten()
                .map(Value::Bool)
                .unwrap_or(Value::Null),
            Self::Time(v) => v
                .get(index)
                .copied()
                .flatten()
                .map(|t| Value::from(t.timestamp_millis()))
                .unwrap_or(Value::Null),
        }
    }

    /// Single-row column holding the last value (null when empty)
    fn last_row(&self) -> Self {
        match self {
            Self::Number(v) => Self::Number(vec![v.last().copied().flatten()]),
            Self::String(v) => Self::String(vec![v.last().cloned().flatten()]),
            Self::Boolean(v) => Self::Boolean(vec![v.last().copied().flatten()]),
            Self::Time(v) => Self::Time(vec![v.last().copied().flatten()]),
        }
    }
}

/// Named column of a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldRepr", into = "FieldRepr")]
pub struct Field {
    name: String,
    values: FieldValues,
}

impl Field {
    pub fn new(name: impl Into<String>, values: FieldValues) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &FieldValues {
        &self.values
    }

    pub fn field_type(&self) -> FieldType {
        self.values.field_type()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Most recent non-null numeric value
    pub fn last_number(&self) -> Option<f64> {
        match &self.values {
            FieldValues::Number(v) => v.iter().rev().find_map(|x| *x),
            _ => None,
        }
    }

    /// Single-row copy of this field holding its last value, under a new name
    pub fn last_row_as(&self, name: impl Into<String>) -> Field {
        Field::new(name, self.values.last_row())
    }
}

#[derive(Serialize, Deserialize)]
struct FieldRepr {
    name: String,
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default)]
    values: Vec<Value>,
}

impl TryFrom<FieldRepr> for Field {
    type Error = PipelineError;

    fn try_from(repr: FieldRepr) -> Result<Self> {
        let name = repr.name;
        let mismatch = |value: &Value| {
            PipelineError::frame(format!(
                "field {name:?} of type {} holds incompatible value {value}",
                repr.field_type
            ))
        };

        let values = match repr.field_type {
            FieldType::Number => FieldValues::Number(
                repr.values
                    .iter()
                    .map(|v| match v {
                        Value::Null => Ok(None),
                        Value::Number(n) => Ok(n.as_f64()),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<_>>()?,
            ),
            FieldType::String => FieldValues::String(
                repr.values
                    .iter()
                    .map(|v| match v {
                        Value::Null => Ok(None),
                        Value::String(s) => Ok(Some(s.clone())),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<_>>()?,
            ),
            FieldType::Boolean => FieldValues::Boolean(
                repr.values
                    .iter()
                    .map(|v| match v {
                        Value::Null => Ok(None),
                        Value::Bool(b) => Ok(Some(*b)),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<_>>()?,
            ),
            FieldType::Time => FieldValues::Time(
                repr.values
                    .iter()
                    .map(|v| match v {
                        Value::Null => Ok(None),
                        other => parse_time(other).map(Some).ok_or_else(|| mismatch(other)),
                    })
                    .collect::<Result<_>>()?,
            ),
        };

        Ok(Field { name, values })
    }
}

impl From<Field> for FieldRepr {
    fn from(field: Field) -> Self {
        let len = field.values.len();
        FieldRepr {
            field_type: field.values.field_type(),
            values: (0..len).map(|i| field.values.get(i)).collect(),
            name: field.name,
        }
    }
}

/// Parse a JSON time value: epoch milliseconds or an RFC 3339 string
pub fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

/// Structured, immutable record of named equal-length columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrameRepr", into = "FrameRepr")]
pub struct Frame {
    name: String,
    fields: Vec<Field>,
}

#[derive(Serialize, Deserialize)]
struct FrameRepr {
    #[serde(default)]
    name: String,
    #[serde(default)]
    fields: Vec<Field>,
}

impl TryFrom<FrameRepr> for Frame {
    type Error = PipelineError;

    fn try_from(repr: FrameRepr) -> Result<Self> {
        Frame::new(repr.name, repr.fields)
    }
}

impl From<Frame> for FrameRepr {
    fn from(frame: Frame) -> Self {
        FrameRepr {
            name: frame.name,
            fields: frame.fields,
        }
    }
}

impl Frame {
    /// Build a frame, enforcing unique field names and equal column lengths
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.name()) {
                return Err(PipelineError::frame(format!(
                    "duplicate field name {:?}",
                    field.name()
                )));
            }
        }

        if let Some(first) = fields.first() {
            let rows = first.len();
            if let Some(bad) = fields.iter().find(|f| f.len() != rows) {
                return Err(PipelineError::frame(format!(
                    "field {:?} has {} values, expected {}",
                    bad.name(),
                    bad.len(),
                    rows
                )));
            }
        }

        Ok(Self {
            name: name.into(),
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn row_count(&self) -> usize {
        self.fields.first().map(Field::len).unwrap_or(0)
    }

    /// New frame with only the named fields, in the order given.
    /// Names not present in the frame are skipped.
    pub fn select(&self, names: &[String]) -> Frame {
        let mut taken = HashSet::new();
        let fields = names
            .iter()
            .filter(|n| taken.insert(n.as_str()))
            .filter_map(|n| self.field(n).cloned())
            .collect();
        Frame {
            name: self.name.clone(),
            fields,
        }
    }

    /// New frame without the named fields
    pub fn without(&self, names: &[String]) -> Frame {
        let drop: HashSet<&str> = names.iter().map(String::as_str).collect();
        let fields = self
            .fields
            .iter()
            .filter(|f| !drop.contains(f.name()))
            .cloned()
            .collect();
        Frame {
            name: self.name.clone(),
            fields,
        }
    }

    /// Field-for-field equality ignoring time columns
    pub fn content_eq(&self, other: &Frame) -> bool {
        let data = |frame: &Frame| -> Vec<Field> {
            frame
                .fields
                .iter()
                .filter(|f| f.field_type() != FieldType::Time)
                .cloned()
                .collect()
        };
        data(self) == data(other)
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> std::result::Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Deserialize from JSON bytes, validating frame invariants
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
