//! Rule registry
//!
//! Holds the active [`RuleSet`] behind an `Arc` that is swapped as a whole
//! on reload. Dispatches clone the `Arc` and keep using the set they started
//! with; a failed load leaves the active set untouched.

use crate::builder::RuleBuilder;
use chrono::{DateTime, Utc};
use live_pipeline_core::prelude::*;
use live_pipeline_core::PipelineMetrics;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// A pattern plus its built pipeline
pub struct ChannelRule {
    pub pattern: ChannelPattern,
    pub converter: Option<Box<dyn Converter>>,
    pub processor: Option<Box<dyn Processor>>,
    pub outputter: Option<Box<dyn Outputter>>,
}

impl ChannelRule {
    /// Stage names for display
    pub fn describe(&self) -> RuleSummary {
        RuleSummary {
            pattern: self.pattern.as_str().to_string(),
            converter: self.converter.as_ref().map(|c| c.name()),
            processor: self.processor.as_ref().map(|p| p.name()),
            outputter: self.outputter.as_ref().map(|o| o.name()),
        }
    }
}

/// Serializable view of a rule
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RuleSummary {
    pub pattern: String,
    pub converter: Option<&'static str>,
    pub processor: Option<&'static str>,
    pub outputter: Option<&'static str>,
}

/// Immutable set of built rules
pub struct RuleSet {
    rules: Vec<ChannelRule>,
    document: ChannelRulesDocument,
    loaded_at: DateTime<Utc>,
}

impl RuleSet {
    pub fn new(rules: Vec<ChannelRule>, document: ChannelRulesDocument) -> Self {
        Self {
            rules,
            document,
            loaded_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), ChannelRulesDocument::default())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[ChannelRule] {
        &self.rules
    }

    /// Document the set was built from
    pub fn document(&self) -> &ChannelRulesDocument {
        &self.document
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// First rule in document order whose pattern matches the channel
    pub fn find(&self, channel: &str) -> Option<(&ChannelRule, ChannelMatch)> {
        self.rules
            .iter()
            .find_map(|rule| rule.pattern.matches(channel).map(|m| (rule, m)))
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field(
                "patterns",
                &self.rules.iter().map(|r| r.pattern.as_str()).collect::<Vec<_>>(),
            )
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// Owner of the active rule set
pub struct RuleRegistry {
    builder: RuleBuilder,
    active: RwLock<Arc<RuleSet>>,
    loaded: AtomicBool,
    source: Option<PathBuf>,
    metrics: PipelineMetrics,
}

impl RuleRegistry {
    /// Registry with an empty rule set
    pub fn new(builder: RuleBuilder) -> Self {
        Self {
            builder,
            active: RwLock::new(Arc::new(RuleSet::empty())),
            loaded: AtomicBool::new(false),
            source: None,
            metrics: PipelineMetrics::new("registry"),
        }
    }

    /// Remember the rules file used by [`RuleRegistry::reload`]
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Whether any load has succeeded yet
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Snapshot of the active rule set
    pub async fn current(&self) -> Arc<RuleSet> {
        self.active.read().await.clone()
    }

    /// Build a document and install it if every rule builds
    pub async fn load(&self, document: ChannelRulesDocument) -> Result<Arc<RuleSet>> {
        let set = match self.builder.build(&document) {
            Ok(set) => set,
            Err(e) => {
                self.metrics.record_rule_load(false);
                warn!(error = %e, "Rule set rejected, keeping active rules");
                return Err(e);
            }
        };

        Ok(self.install(set).await)
    }

    /// Swap in an already built rule set
    pub async fn install(&self, set: impl Into<Arc<RuleSet>>) -> Arc<RuleSet> {
        let set = set.into();
        *self.active.write().await = set.clone();
        self.loaded.store(true, Ordering::Release);
        self.metrics.record_rule_load(true);
        info!(
            rules = set.len(),
            backends = set.document().remote_write_backends.len(),
            "Rule set installed"
        );
        set
    }

    pub async fn load_slice(&self, bytes: &[u8]) -> Result<Arc<RuleSet>> {
        let document = ChannelRulesDocument::from_slice(bytes).inspect_err(|_| {
            self.metrics.record_rule_load(false);
        })?;
        self.load(document).await
    }

    pub async fn load_file(&self, path: impl AsRef<Path>) -> Result<Arc<RuleSet>> {
        let path = path.as_ref();
        let document = ChannelRulesDocument::from_file(path).inspect_err(|_| {
            self.metrics.record_rule_load(false);
        })?;
        info!(path = %path.display(), "Loading channel rules");
        self.load(document).await
    }

    /// Reload from the configured source file
    pub async fn reload(&self) -> Result<Arc<RuleSet>> {
        let path = self
            .source
            .as_ref()
            .ok_or_else(|| PipelineError::config("no rules file configured"))?;
        self.load_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::testing::builder;

    const RULES: &str = r#"{"rules": [
        {"pattern": "stream/{source}/cpu", "settings": {
            "converter": {"type": "jsonAuto", "jsonAuto": {}},
            "outputter": {"type": "localSubscribers"}
        }},
        {"pattern": "stream/*/cpu", "settings": {
            "converter": {"type": "influxAuto", "influxAuto": {}}
        }},
        {"pattern": "stream/>"}
    ]}"#;

    #[tokio::test]
    async fn test_first_match_wins() {
        let registry = RuleRegistry::new(builder());
        registry.load_slice(RULES.as_bytes()).await.unwrap();
        let set = registry.current().await;

        let (rule, matched) = set.find("stream/telegraf/cpu").unwrap();
        assert_eq!(rule.pattern.as_str(), "stream/{source}/cpu");
        assert_eq!(matched.params["source"], "telegraf");

        let (rule, _) = set.find("stream/telegraf/mem").unwrap();
        assert_eq!(rule.pattern.as_str(), "stream/>");
        assert!(set.find("other/channel").is_none());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_active_set() {
        let registry = RuleRegistry::new(builder());
        assert!(!registry.is_loaded());
        let before = registry.load_slice(RULES.as_bytes()).await.unwrap();
        assert!(registry.is_loaded());

        let broken = r#"{"rules": [
            {"pattern": "a/b", "settings": {"converter": {"type": "jsonAuto", "jsonAuto": {}}}},
            {"pattern": "c/d", "settings": {"outputter": {"type": "doesNotExist"}}}
        ]}"#;
        let err = registry.load_slice(broken.as_bytes()).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownType { .. }));

        let after = registry.current().await;
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.len(), 3);
        assert!(after.find("a/b").is_none());

        assert!(registry.load_slice(b"not json").await.is_err());
        assert!(Arc::ptr_eq(&before, &registry.current().await));
    }

    #[tokio::test]
    async fn test_in_flight_snapshot_survives_swap() {
        let registry = RuleRegistry::new(builder());
        registry.load_slice(RULES.as_bytes()).await.unwrap();
        let snapshot = registry.current().await;

        registry.load_slice(br#"{"rules": []}"#).await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(registry.current().await.is_empty());
    }

    #[tokio::test]
    async fn test_reload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, RULES).unwrap();

        let registry = RuleRegistry::new(builder()).with_source(&path);
        assert_eq!(registry.reload().await.unwrap().len(), 3);

        std::fs::write(&path, r#"{"rules": [{"pattern": "x"}]}"#).unwrap();
        assert_eq!(registry.reload().await.unwrap().len(), 1);

        let unsourced = RuleRegistry::new(builder());
        assert!(unsourced.reload().await.unwrap_err().is_build_error());
    }

    #[tokio::test]
    async fn test_describe() {
        let registry = RuleRegistry::new(builder());
        let set = registry.load_slice(RULES.as_bytes()).await.unwrap();
        let summary = set.rules()[0].describe();
        assert_eq!(summary.converter, Some("jsonAuto"));
        assert_eq!(summary.processor, None);
        assert_eq!(summary.outputter, Some("localSubscribers"));
    }
}
