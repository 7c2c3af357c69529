//! Channel rules document
//!
//! Serde model of the declarative rules document. Every configurable stage
//! is a tagged node: a `type` discriminator plus a payload stored under the
//! key of the same name, e.g.
//!
//! ```json
//! {"type": "keepFields", "keepFields": {"fields": ["value"]}}
//! ```
//!
//! These types only describe the document. Resolving a node into an
//! executable stage (and raising unknown-type / missing-payload errors) is
//! done by the rule builder.

use crate::condition::{ConditionType, NumberCompareOp};
use crate::error::{PipelineError, Result};
use crate::frame::FieldType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Root of the rules document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRulesDocument {
    #[serde(default)]
    pub rules: Vec<ChannelRuleConfig>,

    #[serde(default)]
    pub remote_write_backends: Vec<RemoteWriteBackend>,
}

impl ChannelRulesDocument {
    /// Parse a document from JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::config(format!("invalid channel rules document: {e}")))
    }

    /// Read and parse a document from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            PipelineError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_slice(&bytes)
    }

    /// Find a declared remote write backend by UID
    pub fn backend(&self, uid: &str) -> Option<&RemoteWriteBackend> {
        self.remote_write_backends.iter().find(|b| b.uid == uid)
    }
}

/// One pattern plus its pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRuleConfig {
    pub pattern: String,

    #[serde(default)]
    pub settings: ChannelRuleSettings,
}

/// Optional stages of a rule's pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelRuleSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<ConverterConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor: Option<ProcessorConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputter: Option<OutputterConfig>,
}

/// Declared remote time-series ingestion target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteWriteBackend {
    pub uid: String,
    pub settings: RemoteWriteSettings,
}

/// Connection settings of a remote write backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteWriteSettings {
    pub endpoint: Url,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Per-request timeout; the process default applies when absent
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// Implemented by every tagged configuration node
pub trait TaggedNode {
    /// Value of the `type` discriminator
    fn type_name(&self) -> &str;

    /// Keys of the payloads present on this node
    fn populated(&self) -> Vec<&'static str>;

    /// Fail when a payload other than the one named by `type` is set
    fn check_exclusive(&self) -> Result<()> {
        match self
            .populated()
            .into_iter()
            .find(|key| *key != self.type_name())
        {
            Some(extra) => Err(PipelineError::ConflictingConfig {
                type_name: self.type_name().to_string(),
                extra: extra.to_string(),
            }),
            None => Ok(()),
        }
    }
}

macro_rules! populated {
    ($node:expr, $($key:literal => $field:ident),+ $(,)?) => {{
        let mut keys = Vec::new();
        $(
            if $node.$field.is_some() {
                keys.push($key);
            }
        )+
        keys
    }};
}

// ============================================================================
// Converters
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(rename = "jsonAuto", default, skip_serializing_if = "Option::is_none")]
    pub json_auto: Option<JsonAutoConfig>,

    #[serde(rename = "jsonExact", default, skip_serializing_if = "Option::is_none")]
    pub json_exact: Option<JsonExactConfig>,

    #[serde(rename = "jsonFrame", default, skip_serializing_if = "Option::is_none")]
    pub json_frame: Option<JsonFrameConfig>,

    #[serde(rename = "influxAuto", default, skip_serializing_if = "Option::is_none")]
    pub influx_auto: Option<InfluxAutoConfig>,
}

impl TaggedNode for ConverterConfig {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn populated(&self) -> Vec<&'static str> {
        populated!(self,
            "jsonAuto" => json_auto,
            "jsonExact" => json_exact,
            "jsonFrame" => json_frame,
            "influxAuto" => influx_auto,
        )
    }
}

/// Type override for an auto-detected JSON field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldTip {
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonAutoConfig {
    #[serde(default)]
    pub field_tips: HashMap<String, FieldTip>,
}

/// Declared field of an exact JSON schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExactField {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// `$.a.b` path into the document, or `#{now}`
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonExactConfig {
    #[serde(default)]
    pub fields: Vec<ExactField>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonFrameConfig {}

/// Unit of line protocol timestamps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimePrecision {
    #[default]
    Ns,
    Us,
    Ms,
    S,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfluxAutoConfig {
    #[serde(default)]
    pub precision: TimePrecision,
}

// ============================================================================
// Processors
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(rename = "dropFields", default, skip_serializing_if = "Option::is_none")]
    pub drop_fields: Option<FieldListConfig>,

    #[serde(rename = "keepFields", default, skip_serializing_if = "Option::is_none")]
    pub keep_fields: Option<FieldListConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple: Option<MultipleProcessorConfig>,
}

impl TaggedNode for ProcessorConfig {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn populated(&self) -> Vec<&'static str> {
        populated!(self,
            "dropFields" => drop_fields,
            "keepFields" => keep_fields,
            "multiple" => multiple,
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldListConfig {
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultipleProcessorConfig {
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
}

// ============================================================================
// Conditions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionCheckerConfig {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(rename = "numberCompare", default, skip_serializing_if = "Option::is_none")]
    pub number_compare: Option<NumberCompareConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple: Option<MultipleConditionConfig>,
}

impl TaggedNode for ConditionCheckerConfig {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn populated(&self) -> Vec<&'static str> {
        populated!(self,
            "numberCompare" => number_compare,
            "multiple" => multiple,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberCompareConfig {
    pub field_name: String,
    pub op: NumberCompareOp,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipleConditionConfig {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,

    #[serde(default)]
    pub conditions: Vec<ConditionCheckerConfig>,
}

// ============================================================================
// Outputters
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputterConfig {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(rename = "ManagedStream", default, skip_serializing_if = "Option::is_none")]
    pub managed_stream: Option<ManagedStreamOutputConfig>,

    #[serde(rename = "localSubscribers", default, skip_serializing_if = "Option::is_none")]
    pub local_subscribers: Option<LocalSubscribersOutputConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<RedirectOutputConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple: Option<MultipleOutputterConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<ConditionalOutputConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<ThresholdOutputConfig>,

    #[serde(rename = "remoteWrite", default, skip_serializing_if = "Option::is_none")]
    pub remote_write: Option<RemoteWriteOutputConfig>,

    #[serde(rename = "changeLog", default, skip_serializing_if = "Option::is_none")]
    pub change_log: Option<ChangeLogOutputConfig>,
}

impl TaggedNode for OutputterConfig {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn populated(&self) -> Vec<&'static str> {
        populated!(self,
            "ManagedStream" => managed_stream,
            "localSubscribers" => local_subscribers,
            "redirect" => redirect,
            "multiple" => multiple,
            "conditional" => conditional,
            "threshold" => threshold,
            "remoteWrite" => remote_write,
            "changeLog" => change_log,
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagedStreamOutputConfig {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalSubscribersOutputConfig {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectOutputConfig {
    /// Destination channel template
    pub channel: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultipleOutputterConfig {
    #[serde(default)]
    pub outputters: Vec<OutputterConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionalOutputConfig {
    #[serde(default)]
    pub condition: Option<Box<ConditionCheckerConfig>>,

    #[serde(default)]
    pub outputter: Option<Box<OutputterConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdOutputConfig {
    pub field_name: String,
    pub op: NumberCompareOp,
    pub value: f64,
    /// Channel template crossing events are published to
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteWriteOutputConfig {
    pub uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogOutputConfig {
    /// Field to track; the whole frame (minus time columns) when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    /// Channel template change records are published to
    pub channel: String,
}
