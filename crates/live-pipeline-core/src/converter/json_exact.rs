use super::{frame_name, parse_json};
use crate::error::{PipelineError, Result};
use crate::frame::{parse_time, Field, FieldType, FieldValues, Frame};
use crate::rules::JsonExactConfig;
use crate::strategy::{ConvertContext, Converter};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;

const NOW: &str = "#{now}";

#[derive(Debug, Clone)]
enum Source {
    Path(Vec<String>),
    Now,
}

#[derive(Debug, Clone)]
struct ExactColumn {
    name: String,
    field_type: FieldType,
    source: Source,
}

/// Extracts a predeclared list of fields from a JSON object
///
/// Each field reads a `$.a.b` path (numeric segments index arrays) or the
/// arrival time via `#{now}`. A missing path or a value of the wrong type
/// rejects the whole document; keys that are not declared are ignored.
#[derive(Debug, Clone)]
pub struct JsonExactConverter {
    columns: Vec<ExactColumn>,
}

impl JsonExactConverter {
    pub fn new(config: JsonExactConfig) -> Result<Self> {
        if config.fields.is_empty() {
            return Err(PipelineError::config("jsonExact declares no fields"));
        }
        let duplicate = {
            let mut seen = HashSet::new();
            config
                .fields
                .iter()
                .find(|f| !seen.insert(f.name.as_str()))
                .map(|f| f.name.clone())
        };
        if let Some(name) = duplicate {
            return Err(PipelineError::ConflictingConfig {
                type_name: "jsonExact".to_string(),
                extra: format!("field {name:?} twice"),
            });
        }

        let columns = config
            .fields
            .into_iter()
            .map(|field| {
                let source = if field.value == NOW {
                    if field.field_type != FieldType::Time {
                        return Err(PipelineError::config(format!(
                            "jsonExact field {:?}: {NOW} requires type time",
                            field.name
                        )));
                    }
                    Source::Now
                } else {
                    Source::Path(parse_path(&field.value).ok_or_else(|| {
                        PipelineError::config(format!(
                            "jsonExact field {:?}: invalid value {:?}",
                            field.name, field.value
                        ))
                    })?)
                };
                Ok(ExactColumn {
                    name: field.name,
                    field_type: field.field_type,
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { columns })
    }

    fn extract(&self, column: &ExactColumn, doc: &Value, now: DateTime<Utc>) -> Result<FieldValues> {
        let path = match &column.source {
            Source::Now => return Ok(FieldValues::Time(vec![Some(now)])),
            Source::Path(path) => path,
        };

        let value = lookup(doc, path).ok_or_else(|| {
            PipelineError::convert(format!(
                "field {:?}: $.{} not found",
                column.name,
                path.join(".")
            ))
        })?;
        let mismatch = || {
            PipelineError::convert(format!(
                "field {:?}: expected {}, got {value}",
                column.name, column.field_type
            ))
        };

        let values = match (column.field_type, value) {
            (t, Value::Null) => FieldValues::nulls(t, 1),
            (FieldType::Number, Value::Number(n)) => FieldValues::Number(vec![n.as_f64()]),
            (FieldType::String, Value::String(s)) => FieldValues::String(vec![Some(s.clone())]),
            (FieldType::Boolean, Value::Bool(b)) => FieldValues::Boolean(vec![Some(*b)]),
            (FieldType::Time, v) => FieldValues::Time(vec![Some(parse_time(v).ok_or_else(mismatch)?)]),
            _ => return Err(mismatch()),
        };
        Ok(values)
    }
}

impl Converter for JsonExactConverter {
    fn convert(&self, ctx: &ConvertContext, payload: &[u8]) -> Result<Vec<Frame>> {
        let doc = parse_json(payload)?;
        if !doc.is_object() {
            return Err(PipelineError::convert("expected a JSON object"));
        }

        let fields = self
            .columns
            .iter()
            .map(|column| {
                self.extract(column, &doc, ctx.received_at)
                    .map(|values| Field::new(column.name.clone(), values))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(vec![Frame::new(frame_name(&ctx.channel), fields)?])
    }

    fn name(&self) -> &'static str {
        "jsonExact"
    }
}

/// `$.a.b` into `["a", "b"]`; `$` alone is rejected
fn parse_path(raw: &str) -> Option<Vec<String>> {
    let rest = raw.strip_prefix("$.")?;
    let segments: Vec<String> = rest.split('.').map(str::to_string).collect();
    segments
        .iter()
        .all(|s| !s.is_empty())
        .then_some(segments)
}

fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ExactField;

    fn field(name: &str, field_type: FieldType, value: &str) -> ExactField {
        ExactField {
            name: name.to_string(),
            field_type,
            value: value.to_string(),
        }
    }

    fn converter() -> JsonExactConverter {
        JsonExactConverter::new(JsonExactConfig {
            fields: vec![
                field("time", FieldType::Time, NOW),
                field("usage", FieldType::Number, "$.cpu.usage"),
                field("host", FieldType::String, "$.hosts.0"),
                field("up", FieldType::Boolean, "$.up"),
            ],
        })
        .unwrap()
    }

    #[test]
    fn test_extracts_declared_fields() {
        let payload = br#"{"cpu": {"usage": 12.5, "idle": 80}, "hosts": ["a", "b"], "up": true, "extra": 1}"#;
        let frames = converter()
            .convert(&ConvertContext::new("stream/exact"), payload)
            .unwrap();
        let frame = &frames[0];
        let names: Vec<&str> = frame.fields().iter().map(Field::name).collect();
        assert_eq!(names, vec!["time", "usage", "host", "up"]);
        assert_eq!(frame.field("usage").unwrap().last_number(), Some(12.5));
        assert_eq!(frame.field("host").unwrap().values().get(0), serde_json::json!("a"));
    }

    #[test]
    fn test_rejects_missing_field() {
        let payload = br#"{"cpu": {}, "hosts": ["a"], "up": true}"#;
        let err = converter()
            .convert(&ConvertContext::new("stream/exact"), payload)
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_rejects_wrong_type() {
        let payload = br#"{"cpu": {"usage": "high"}, "hosts": ["a"], "up": true}"#;
        let err = converter()
            .convert(&ConvertContext::new("stream/exact"), payload)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Convert { .. }));
    }

    #[test]
    fn test_null_is_allowed() {
        let payload = br#"{"cpu": {"usage": null}, "hosts": ["a"], "up": false}"#;
        let frames = converter()
            .convert(&ConvertContext::new("stream/exact"), payload)
            .unwrap();
        assert_eq!(frames[0].field("usage").unwrap().last_number(), None);
    }

    #[test]
    fn test_invalid_declarations() {
        let bad_path = JsonExactConfig {
            fields: vec![field("a", FieldType::Number, "cpu.usage")],
        };
        assert!(JsonExactConverter::new(bad_path).unwrap_err().is_build_error());

        let bad_now = JsonExactConfig {
            fields: vec![field("a", FieldType::Number, NOW)],
        };
        assert!(JsonExactConverter::new(bad_now).is_err());

        assert!(JsonExactConverter::new(JsonExactConfig::default()).is_err());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let duplicated = JsonExactConfig {
            fields: vec![
                field("v", FieldType::Number, "$.a"),
                field("v", FieldType::Number, "$.b"),
            ],
        };
        let err = JsonExactConverter::new(duplicated).unwrap_err();
        assert!(matches!(err, PipelineError::ConflictingConfig { .. }));
        assert!(err.is_build_error());
    }
}
