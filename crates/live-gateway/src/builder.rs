//! Rule builder
//!
//! Resolves the tagged configuration nodes of a [`ChannelRulesDocument`]
//! into executable stages. Resolution is a recursive descent over the
//! document: `multiple` nodes recurse into their children, `conditional`
//! resolves a condition and an outputter, and `remoteWrite` looks its
//! backend up among the document's declared backends.
//!
//! Any error aborts the whole build; a partially built rule set is never
//! returned.

use crate::managed_stream::ManagedStream;
use crate::outputter::{
    ChangeLogOutput, ConditionalOutput, LocalSubscribersOutput, ManagedStreamOutput,
    MultipleOutput, RedirectOutput, RemoteWriteOutput, ThresholdOutput,
};
use crate::registry::{ChannelRule, RuleSet};
use crate::store::KeyedLocks;
use live_pipeline_core::condition::{MultipleCondition, NumberCompareCondition};
use live_pipeline_core::converter::{
    InfluxAutoConverter, JsonAutoConverter, JsonExactConverter, JsonFrameConverter,
};
use live_pipeline_core::prelude::*;
use live_pipeline_core::processor::{DropFieldsProcessor, KeepFieldsProcessor, MultipleProcessor};
use live_pipeline_core::rules::{
    ChannelRuleConfig, ConditionCheckerConfig, ConverterConfig, OutputterConfig, ProcessorConfig,
    RemoteWriteBackend, TaggedNode,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Collaborators injected into the stages the builder creates
#[derive(Clone)]
pub struct BuilderDeps {
    pub broadcaster: Arc<dyn Broadcaster>,
    pub managed_stream: Arc<ManagedStream>,
    pub frame_store: Arc<dyn FrameStore>,
    pub locks: Arc<KeyedLocks>,
    pub remote_writer: Arc<dyn RemoteWriter>,
    pub remote_write_timeout: Duration,
}

/// Per-rule resolution scope
struct Scope<'a> {
    pattern: &'a ChannelPattern,
    backends: &'a [RemoteWriteBackend],
}

/// Turns configuration nodes into pipeline stages
#[derive(Clone)]
pub struct RuleBuilder {
    deps: BuilderDeps,
}

/// Payload of a node, or `MissingConfig` naming its type
fn payload<'a, T>(node: &impl TaggedNode, payload: &'a Option<T>) -> Result<&'a T> {
    payload
        .as_ref()
        .ok_or_else(|| PipelineError::missing_config(node.type_name()))
}

impl RuleBuilder {
    pub fn new(deps: BuilderDeps) -> Self {
        Self { deps }
    }

    /// Build every rule of the document
    pub fn build(&self, document: &ChannelRulesDocument) -> Result<RuleSet> {
        let mut uids = HashSet::new();
        for backend in &document.remote_write_backends {
            if !uids.insert(backend.uid.as_str()) {
                return Err(PipelineError::config(format!(
                    "duplicate remote write backend uid: {}",
                    backend.uid
                )));
            }
        }

        let mut patterns = HashSet::new();
        let mut rules = Vec::with_capacity(document.rules.len());
        for config in &document.rules {
            if !patterns.insert(config.pattern.as_str()) {
                return Err(PipelineError::DuplicatePattern {
                    pattern: config.pattern.clone(),
                });
            }
            rules.push(self.build_rule(config, &document.remote_write_backends)?);
        }

        debug!(rules = rules.len(), "Rule set built");
        Ok(RuleSet::new(rules, document.clone()))
    }

    /// Build a single rule against the given backend declarations
    pub fn build_rule(
        &self,
        config: &ChannelRuleConfig,
        backends: &[RemoteWriteBackend],
    ) -> Result<ChannelRule> {
        let pattern = ChannelPattern::parse(&config.pattern)?;
        let scope = Scope {
            pattern: &pattern,
            backends,
        };
        let settings = &config.settings;

        let converter = settings
            .converter
            .as_ref()
            .map(|c| self.converter(c))
            .transpose()?;
        let processor = settings
            .processor
            .as_ref()
            .map(|p| self.processor(p))
            .transpose()?;
        let outputter = settings
            .outputter
            .as_ref()
            .map(|o| self.outputter(o, &scope))
            .transpose()?;

        Ok(ChannelRule {
            pattern,
            converter,
            processor,
            outputter,
        })
    }

    pub fn converter(&self, config: &ConverterConfig) -> Result<Box<dyn Converter>> {
        let converter: Box<dyn Converter> = match config.type_name.as_str() {
            "jsonAuto" => Box::new(JsonAutoConverter::new(
                payload(config, &config.json_auto)?.clone(),
            )),
            "jsonExact" => Box::new(JsonExactConverter::new(
                payload(config, &config.json_exact)?.clone(),
            )?),
            "jsonFrame" => Box::new(JsonFrameConverter::new(
                payload(config, &config.json_frame)?.clone(),
            )),
            "influxAuto" => Box::new(InfluxAutoConverter::new(
                payload(config, &config.influx_auto)?.clone(),
            )),
            other => return Err(PipelineError::unknown_type(StageKind::Converter, other)),
        };
        config.check_exclusive()?;
        Ok(converter)
    }

    pub fn processor(&self, config: &ProcessorConfig) -> Result<Box<dyn Processor>> {
        let processor: Box<dyn Processor> = match config.type_name.as_str() {
            "keepFields" => Box::new(KeepFieldsProcessor::new(
                payload(config, &config.keep_fields)?.fields.clone(),
            )),
            "dropFields" => Box::new(DropFieldsProcessor::new(
                payload(config, &config.drop_fields)?.fields.clone(),
            )),
            "multiple" => {
                let children = payload(config, &config.multiple)?
                    .processors
                    .iter()
                    .map(|child| self.processor(child))
                    .collect::<Result<Vec<_>>>()?;
                Box::new(MultipleProcessor::new(children))
            }
            other => return Err(PipelineError::unknown_type(StageKind::Processor, other)),
        };
        config.check_exclusive()?;
        Ok(processor)
    }

    pub fn condition(&self, config: &ConditionCheckerConfig) -> Result<Box<dyn ConditionChecker>> {
        let condition: Box<dyn ConditionChecker> = match config.type_name.as_str() {
            "numberCompare" => {
                let settings = payload(config, &config.number_compare)?;
                Box::new(NumberCompareCondition::new(
                    settings.field_name.clone(),
                    settings.op,
                    settings.value,
                ))
            }
            "multiple" => {
                let settings = payload(config, &config.multiple)?;
                let children = settings
                    .conditions
                    .iter()
                    .map(|child| self.condition(child))
                    .collect::<Result<Vec<_>>>()?;
                Box::new(MultipleCondition::new(settings.condition_type, children))
            }
            other => return Err(PipelineError::unknown_type(StageKind::Condition, other)),
        };
        config.check_exclusive()?;
        Ok(condition)
    }

    fn outputter(&self, config: &OutputterConfig, scope: &Scope<'_>) -> Result<Box<dyn Outputter>> {
        let deps = &self.deps;
        let outputter: Box<dyn Outputter> = match config.type_name.as_str() {
            "localSubscribers" => Box::new(LocalSubscribersOutput::new(deps.broadcaster.clone())),
            "ManagedStream" => Box::new(ManagedStreamOutput::new(deps.managed_stream.clone())),
            "redirect" => {
                let settings = payload(config, &config.redirect)?;
                Box::new(RedirectOutput::new(
                    ChannelTemplate::parse(&settings.channel, scope.pattern)?,
                    deps.broadcaster.clone(),
                ))
            }
            "multiple" => {
                let children = payload(config, &config.multiple)?
                    .outputters
                    .iter()
                    .map(|child| self.outputter(child, scope))
                    .collect::<Result<Vec<_>>>()?;
                Box::new(MultipleOutput::new(children))
            }
            "conditional" => {
                let settings = payload(config, &config.conditional)?;
                let condition = settings
                    .condition
                    .as_deref()
                    .ok_or_else(|| PipelineError::missing_config("conditional.condition"))?;
                let child = settings
                    .outputter
                    .as_deref()
                    .ok_or_else(|| PipelineError::missing_config("conditional.outputter"))?;
                Box::new(ConditionalOutput::new(
                    self.condition(condition)?,
                    self.outputter(child, scope)?,
                ))
            }
            "threshold" => {
                let settings = payload(config, &config.threshold)?;
                Box::new(ThresholdOutput::new(
                    NumberCompareCondition::new(
                        settings.field_name.clone(),
                        settings.op,
                        settings.value,
                    ),
                    ChannelTemplate::parse(&settings.channel, scope.pattern)?,
                    deps.broadcaster.clone(),
                    deps.frame_store.clone(),
                    deps.locks.clone(),
                ))
            }
            "changeLog" => {
                let settings = payload(config, &config.change_log)?;
                Box::new(ChangeLogOutput::new(
                    settings.field_name.clone(),
                    ChannelTemplate::parse(&settings.channel, scope.pattern)?,
                    deps.broadcaster.clone(),
                    deps.frame_store.clone(),
                    deps.locks.clone(),
                ))
            }
            "remoteWrite" => {
                let settings = payload(config, &config.remote_write)?;
                let backend = scope
                    .backends
                    .iter()
                    .find(|b| b.uid == settings.uid)
                    .ok_or_else(|| PipelineError::UnknownRemoteWriteBackend {
                        uid: settings.uid.clone(),
                    })?;
                Box::new(RemoteWriteOutput::new(
                    backend.clone(),
                    deps.remote_writer.clone(),
                    deps.remote_write_timeout,
                ))
            }
            other => return Err(PipelineError::unknown_type(StageKind::Outputter, other)),
        };
        config.check_exclusive()?;
        Ok(outputter)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::builder;
    use super::*;
    use serde_json::json;

    fn document(value: serde_json::Value) -> ChannelRulesDocument {
        serde_json::from_value(value).unwrap()
    }

    fn rule(settings: serde_json::Value) -> ChannelRulesDocument {
        document(json!({
            "rules": [{"pattern": "stream/{source}/cpu", "settings": settings}],
            "remoteWriteBackends": [
                {"uid": "prom", "settings": {"endpoint": "http://localhost:9090/write"}}
            ]
        }))
    }

    fn build_err(settings: serde_json::Value) -> PipelineError {
        match builder().build(&rule(settings)) {
            Ok(_) => panic!("build should fail"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_builds_full_rule() {
        let set = builder()
            .build(&rule(json!({
                "converter": {"type": "jsonAuto", "jsonAuto": {}},
                "processor": {"type": "multiple", "multiple": {"processors": [
                    {"type": "dropFields", "dropFields": {"fields": ["host"]}},
                    {"type": "keepFields", "keepFields": {"fields": ["value"]}}
                ]}},
                "outputter": {"type": "multiple", "multiple": {"outputters": [
                    {"type": "ManagedStream"},
                    {"type": "localSubscribers"},
                    {"type": "redirect", "redirect": {"channel": "derived/{source}"}},
                    {"type": "conditional", "conditional": {
                        "condition": {"type": "multiple", "multiple": {"type": "AND", "conditions": [
                            {"type": "numberCompare", "numberCompare": {"fieldName": "value", "op": "gt", "value": 1}}
                        ]}},
                        "outputter": {"type": "remoteWrite", "remoteWrite": {"uid": "prom"}}
                    }},
                    {"type": "threshold", "threshold": {"fieldName": "value", "op": "gte", "value": 5, "channel": "alerts/{source}"}},
                    {"type": "changeLog", "changeLog": {"channel": "changes/{source}"}}
                ]}}
            })))
            .unwrap();
        assert_eq!(set.len(), 1);
        let rule = &set.rules()[0];
        assert!(rule.converter.is_some());
        assert!(rule.processor.is_some());
        assert_eq!(rule.outputter.as_ref().unwrap().name(), "multiple");
    }

    #[test]
    fn test_absent_stages_are_not_errors() {
        let set = builder().build(&rule(json!({}))).unwrap();
        let rule = &set.rules()[0];
        assert!(rule.converter.is_none() && rule.processor.is_none() && rule.outputter.is_none());
    }

    #[test]
    fn test_unknown_types() {
        let cases = [
            (json!({"converter": {"type": "xml"}}), StageKind::Converter),
            (json!({"processor": {"type": "rename"}}), StageKind::Processor),
            (json!({"outputter": {"type": "kafka"}}), StageKind::Outputter),
            (
                json!({"outputter": {"type": "conditional", "conditional": {
                    "condition": {"type": "regex"},
                    "outputter": {"type": "localSubscribers"}
                }}}),
                StageKind::Condition,
            ),
        ];
        for (settings, expected) in cases {
            match build_err(settings) {
                PipelineError::UnknownType { kind, .. } => assert_eq!(kind, expected),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_missing_payloads() {
        let cases = [
            json!({"converter": {"type": "jsonAuto"}}),
            json!({"converter": {"type": "jsonExact"}}),
            json!({"converter": {"type": "jsonFrame"}}),
            json!({"converter": {"type": "influxAuto"}}),
            json!({"processor": {"type": "keepFields"}}),
            json!({"processor": {"type": "dropFields"}}),
            json!({"processor": {"type": "multiple"}}),
            json!({"outputter": {"type": "redirect"}}),
            json!({"outputter": {"type": "multiple"}}),
            json!({"outputter": {"type": "conditional"}}),
            json!({"outputter": {"type": "threshold"}}),
            json!({"outputter": {"type": "remoteWrite"}}),
            json!({"outputter": {"type": "changeLog"}}),
            json!({"outputter": {"type": "conditional", "conditional": {
                "condition": {"type": "numberCompare"},
                "outputter": {"type": "localSubscribers"}
            }}}),
            json!({"outputter": {"type": "conditional", "conditional": {
                "outputter": {"type": "localSubscribers"}
            }}}),
        ];
        for settings in cases {
            let err = build_err(settings.clone());
            assert!(
                matches!(err, PipelineError::MissingConfig { .. }),
                "{settings}: {err}"
            );
        }
    }

    #[test]
    fn test_failure_in_nested_child_aborts_build() {
        let err = build_err(json!({
            "outputter": {"type": "multiple", "multiple": {"outputters": [
                {"type": "localSubscribers"},
                {"type": "multiple", "multiple": {"outputters": [{"type": "bogus"}]}}
            ]}}
        }));
        assert!(matches!(err, PipelineError::UnknownType { .. }));
    }

    #[test]
    fn test_unknown_remote_write_backend() {
        let err = build_err(json!({
            "outputter": {"type": "remoteWrite", "remoteWrite": {"uid": "missing"}}
        }));
        assert!(matches!(err, PipelineError::UnknownRemoteWriteBackend { ref uid } if uid == "missing"));
    }

    #[test]
    fn test_conflicting_payload() {
        let err = build_err(json!({
            "processor": {"type": "keepFields", "keepFields": {"fields": []}, "dropFields": {"fields": []}}
        }));
        assert!(matches!(err, PipelineError::ConflictingConfig { .. }));
    }

    #[test]
    fn test_json_exact_duplicate_names_fail_build() {
        let err = build_err(json!({
            "converter": {"type": "jsonExact", "jsonExact": {"fields": [
                {"name": "usage", "type": "number", "value": "$.cpu.usage"},
                {"name": "usage", "type": "number", "value": "$.cpu.idle"}
            ]}}
        }));
        assert!(matches!(err, PipelineError::ConflictingConfig { ref type_name, .. } if type_name == "jsonExact"));
    }

    #[test]
    fn test_template_must_use_known_captures() {
        let err = build_err(json!({
            "outputter": {"type": "redirect", "redirect": {"channel": "derived/{host}"}}
        }));
        assert!(matches!(err, PipelineError::UnknownPatternParam { .. }));
    }

    #[test]
    fn test_duplicate_patterns_and_backends() {
        let err = builder()
            .build(&document(json!({"rules": [
                {"pattern": "a/b"},
                {"pattern": "a/b"}
            ]})))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::DuplicatePattern { .. }));

        let err = builder()
            .build(&document(json!({"remoteWriteBackends": [
                {"uid": "x", "settings": {"endpoint": "http://a/"}},
                {"uid": "x", "settings": {"endpoint": "http://b/"}}
            ]})))
            .err()
            .unwrap();
        assert!(err.is_build_error());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = builder()
            .build(&document(json!({"rules": [{"pattern": "a//b"}]})))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::InvalidPattern { .. }));
    }
}
