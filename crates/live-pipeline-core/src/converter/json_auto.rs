use super::{frame_name, parse_json};
use crate::error::{PipelineError, Result};
use crate::frame::{parse_time, Field, FieldType, FieldValues, Frame};
use crate::rules::JsonAutoConfig;
use crate::strategy::{ConvertContext, Converter};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Infers a single-row frame from the shape of a JSON object
///
/// Nested objects are flattened with dotted names (`{"a": {"b": 1}}` gives
/// field `a.b`). Nested arrays are kept as their JSON text. Nulls are
/// skipped unless a field tip declares the type. A leading `time` column
/// holding the arrival time is added unless the document has its own
/// `time` key. An untipped `time` key is always time typed, falling back to
/// the arrival time when it is null or unparseable. A top-level array yields
/// one frame per element.
#[derive(Debug, Clone, Default)]
pub struct JsonAutoConverter {
    tips: HashMap<String, FieldType>,
}

impl JsonAutoConverter {
    pub fn new(config: JsonAutoConfig) -> Self {
        Self {
            tips: config
                .field_tips
                .into_iter()
                .map(|(name, tip)| (name, tip.field_type))
                .collect(),
        }
    }

    fn object_frame(
        &self,
        name: &str,
        object: &Map<String, Value>,
        received_at: DateTime<Utc>,
    ) -> Result<Frame> {
        let mut flat = Vec::new();
        flatten("", object, &mut flat);

        let mut fields = Vec::with_capacity(flat.len() + 1);
        if !flat.iter().any(|(key, _)| key == "time") {
            fields.push(Field::new("time", FieldValues::Time(vec![Some(received_at)])));
        }
        for (key, value) in flat {
            let tip = self.tips.get(&key).copied();
            if key == "time" && tip.is_none() {
                let at = parse_time(value).unwrap_or(received_at);
                fields.push(Field::new(key, FieldValues::Time(vec![Some(at)])));
                continue;
            }
            if let Some(values) = auto_values(value, tip) {
                fields.push(Field::new(key, values));
            }
        }

        Frame::new(name, fields)
    }
}

impl Converter for JsonAutoConverter {
    fn convert(&self, ctx: &ConvertContext, payload: &[u8]) -> Result<Vec<Frame>> {
        let name = frame_name(&ctx.channel);
        match parse_json(payload)? {
            Value::Object(object) => Ok(vec![self.object_frame(name, &object, ctx.received_at)?]),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(object) => self.object_frame(name, object, ctx.received_at),
                    other => Err(PipelineError::convert(format!(
                        "array element is not an object: {other}"
                    ))),
                })
                .collect(),
            other => Err(PipelineError::convert(format!(
                "expected a JSON object or array, got {other}"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "jsonAuto"
    }
}

fn flatten<'a>(prefix: &str, object: &'a Map<String, Value>, out: &mut Vec<(String, &'a Value)>) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) => flatten(&name, inner, out),
            _ => out.push((name, value)),
        }
    }
}

/// Single-row column for a JSON scalar, `None` when the value is skipped
fn auto_values(value: &Value, tip: Option<FieldType>) -> Option<FieldValues> {
    let field_type = match (tip, value) {
        (Some(t), _) => t,
        (None, Value::Null) => return None,
        (None, Value::Number(_)) => FieldType::Number,
        (None, Value::Bool(_)) => FieldType::Boolean,
        (None, _) => FieldType::String,
    };

    let values = match field_type {
        FieldType::Number => FieldValues::Number(vec![match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }]),
        FieldType::String => FieldValues::String(vec![match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }]),
        FieldType::Boolean => FieldValues::Boolean(vec![match value {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }]),
        FieldType::Time => FieldValues::Time(vec![parse_time(value)]),
    };
    Some(values)
}
