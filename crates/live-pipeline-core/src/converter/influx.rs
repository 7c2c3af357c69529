//! Line protocol converter
//!
//! ```text
//! measurement[,tag=value...] field=value[,field=value...] [timestamp]
//! ```
//!
//! Lines are grouped into one frame per measurement, in first-seen order.
//! Columns are `time`, then the union of tag keys (sorted, string typed),
//! then fields in first-seen order. Rows lacking a tag or field hold null.
//! A tag named `time` or named like a field is dropped.

use crate::error::{PipelineError, Result};
use crate::frame::{Field, FieldType, FieldValues, Frame};
use crate::rules::{InfluxAutoConfig, TimePrecision};
use crate::strategy::{ConvertContext, Converter};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
enum LineValue {
    Number(f64),
    String(String),
    Boolean(bool),
}

impl LineValue {
    fn field_type(&self) -> FieldType {
        match self {
            Self::Number(_) => FieldType::Number,
            Self::String(_) => FieldType::String,
            Self::Boolean(_) => FieldType::Boolean,
        }
    }
}

#[derive(Debug)]
struct Line {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, LineValue)>,
    timestamp: Option<i64>,
}

#[derive(Debug, Default)]
struct Measurement {
    rows: Vec<Line>,
}

/// Converts line protocol payloads, one frame per measurement
#[derive(Debug, Clone, Default)]
pub struct InfluxAutoConverter {
    precision: TimePrecision,
}

impl InfluxAutoConverter {
    pub fn new(config: InfluxAutoConfig) -> Self {
        Self {
            precision: config.precision,
        }
    }

    fn timestamp(&self, raw: i64) -> Result<DateTime<Utc>> {
        let scale: i64 = match self.precision {
            TimePrecision::Ns => 1,
            TimePrecision::Us => 1_000,
            TimePrecision::Ms => 1_000_000,
            TimePrecision::S => 1_000_000_000,
        };
        raw.checked_mul(scale)
            .map(|nanos| Utc.timestamp_nanos(nanos))
            .ok_or_else(|| PipelineError::convert(format!("timestamp {raw} out of range")))
    }

    fn build_frame(&self, name: &str, rows: &[Line], received_at: DateTime<Utc>) -> Result<Frame> {
        let times = rows
            .iter()
            .map(|row| match row.timestamp {
                Some(ts) => self.timestamp(ts).map(Some),
                None => Ok(Some(received_at)),
            })
            .collect::<Result<Vec<_>>>()?;
        let mut fields = vec![Field::new("time", FieldValues::Time(times))];

        let field_keys: HashSet<&str> = rows
            .iter()
            .flat_map(|row| row.fields.iter().map(|(k, _)| k.as_str()))
            .collect();
        let tag_keys: BTreeSet<&str> = rows
            .iter()
            .flat_map(|row| row.tags.iter().map(|(k, _)| k.as_str()))
            .collect();
        for key in tag_keys {
            if key == "time" || field_keys.contains(key) {
                debug!(measurement = name, tag = key, "Dropping tag that collides with a column");
                continue;
            }
            let values = rows
                .iter()
                .map(|row| {
                    row.tags
                        .iter()
                        .find(|(k, _)| k == key)
                        .map(|(_, v)| v.clone())
                })
                .collect();
            fields.push(Field::new(key, FieldValues::String(values)));
        }

        let mut field_types: Vec<(&str, FieldType)> = Vec::new();
        for row in rows {
            for (key, value) in &row.fields {
                match field_types.iter().find(|(k, _)| k == key) {
                    Some((_, t)) if *t != value.field_type() => {
                        return Err(PipelineError::convert(format!(
                            "field {key:?} of measurement {name:?} mixes {t} and {}",
                            value.field_type()
                        )));
                    }
                    Some(_) => {}
                    None => field_types.push((key.as_str(), value.field_type())),
                }
            }
        }

        for (key, field_type) in field_types {
            let mut column = FieldValues::nulls(field_type, rows.len());
            for (i, row) in rows.iter().enumerate() {
                let Some((_, value)) = row.fields.iter().find(|(k, _)| k == key) else {
                    continue;
                };
                match (&mut column, value) {
                    (FieldValues::Number(c), LineValue::Number(n)) => c[i] = Some(*n),
                    (FieldValues::String(c), LineValue::String(s)) => c[i] = Some(s.clone()),
                    (FieldValues::Boolean(c), LineValue::Boolean(b)) => c[i] = Some(*b),
                    _ => {}
                }
            }
            fields.push(Field::new(key, column));
        }

        Frame::new(name, fields)
    }
}

impl Converter for InfluxAutoConverter {
    fn convert(&self, ctx: &ConvertContext, payload: &[u8]) -> Result<Vec<Frame>> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| PipelineError::convert_with_source("payload is not UTF-8", e))?;

        let mut order: Vec<String> = Vec::new();
        let mut measurements: HashMap<String, Measurement> = HashMap::new();
        for (number, raw) in text.lines().enumerate() {
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let line = parse_line(raw).map_err(|message| {
                PipelineError::convert(format!("line {}: {message}", number + 1))
            })?;
            if !measurements.contains_key(&line.measurement) {
                order.push(line.measurement.clone());
            }
            measurements
                .entry(line.measurement.clone())
                .or_default()
                .rows
                .push(line);
        }

        order
            .iter()
            .filter_map(|name| measurements.get(name).map(|m| (name, m)))
            .map(|(name, m)| self.build_frame(name, &m.rows, ctx.received_at))
            .collect()
    }

    fn name(&self) -> &'static str {
        "influxAuto"
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn parse_line(line: &str) -> std::result::Result<Line, String> {
    let sections: Vec<&str> = split_unescaped(line, ' ', true)
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    let (key_section, field_section, timestamp) = match sections.as_slice() {
        [key, fields] => (*key, *fields, None),
        [key, fields, ts] => (*key, *fields, Some(*ts)),
        _ => return Err("expected measurement, fields and optional timestamp".to_string()),
    };

    let mut key_parts = split_unescaped(key_section, ',', false).into_iter();
    let measurement = unescape(key_parts.next().unwrap_or_default());
    if measurement.is_empty() {
        return Err("missing measurement".to_string());
    }

    let tags = key_parts
        .map(|pair| {
            let (k, v) = split_pair(pair).ok_or_else(|| format!("invalid tag {pair:?}"))?;
            Ok((unescape(k), unescape(v)))
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;

    let fields = split_unescaped(field_section, ',', true)
        .into_iter()
        .map(|pair| {
            let (k, v) = split_pair(pair).ok_or_else(|| format!("invalid field {pair:?}"))?;
            Ok((unescape(k), parse_value(v)?))
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;

    let timestamp = timestamp
        .map(|ts| {
            ts.parse::<i64>()
                .map_err(|_| format!("invalid timestamp {ts:?}"))
        })
        .transpose()?;

    Ok(Line {
        measurement,
        tags,
        fields,
        timestamp,
    })
}

fn parse_value(raw: &str) -> std::result::Result<LineValue, String> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Ok(LineValue::String(unescape(&raw[1..raw.len() - 1])));
    }
    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(LineValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(LineValue::Boolean(false)),
        _ => {}
    }
    let invalid = || format!("invalid field value {raw:?}");
    if let Some(int) = raw.strip_suffix('i') {
        return int
            .parse::<i64>()
            .map(|n| LineValue::Number(n as f64))
            .map_err(|_| invalid());
    }
    if let Some(uint) = raw.strip_suffix('u') {
        return uint
            .parse::<u64>()
            .map(|n| LineValue::Number(n as f64))
            .map_err(|_| invalid());
    }
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(LineValue::Number)
        .ok_or_else(invalid)
}

/// Split on `sep` unless escaped with `\` or, when `quotes` is set, inside
/// double quotes
fn split_unescaped(s: &str, sep: char, quotes: bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut in_quotes = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' if quotes => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Split `key=value` at the first unescaped `=`
fn split_pair(pair: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in pair.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '=' => {
                let (key, value) = (&pair[..i], &pair[i + 1..]);
                return (!key.is_empty() && !value.is_empty()).then_some((key, value));
            }
            _ => {}
        }
    }
    None
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, ',' | '=' | ' ' | '"' | '\\') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}
