//! Channel pattern matching
//!
//! Channels are '/'-separated paths such as `stream/telegraf/cpu`. Rule
//! patterns use the same shape with wildcard segments:
//!
//! - `*` matches exactly one segment
//! - `{name}` matches exactly one segment and captures it as `name`
//! - `>` matches one or more remaining segments (last segment only)
//!
//! Captures can be substituted into destination channel templates, e.g. a
//! rule on `stream/telegraf/{measurement}` can redirect to
//! `stream/alerts/{measurement}`.

use crate::error::{PipelineError, Result};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
    Param(String),
    Tail,
}

/// Parsed channel pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl ChannelPattern {
    /// Parse a pattern, rejecting empty segments, misplaced `>` and
    /// duplicate or malformed parameters
    pub fn parse(pattern: &str) -> Result<Self> {
        let invalid = |message: &str| PipelineError::InvalidPattern {
            pattern: pattern.to_string(),
            message: message.to_string(),
        };

        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let parts: Vec<&str> = pattern.split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut params: Vec<&str> = Vec::new();

        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "" => return Err(invalid("empty segment")),
                "*" => Segment::Any,
                ">" if i + 1 == parts.len() => Segment::Tail,
                ">" => return Err(invalid("'>' is only allowed as the last segment")),
                p if p.starts_with('{') && p.ends_with('}') => {
                    let name = &p[1..p.len() - 1];
                    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                        return Err(invalid("parameter names must be alphanumeric"));
                    }
                    if params.contains(&name) {
                        return Err(invalid("duplicate parameter name"));
                    }
                    params.push(name);
                    Segment::Param(name.to_string())
                }
                p if p.contains(['{', '}', '*', '>']) => {
                    return Err(invalid("wildcards must span a whole segment"))
                }
                p => Segment::Literal(p.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names of the captures this pattern defines
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Match a channel, returning its captures on success
    pub fn matches(&self, channel: &str) -> Option<ChannelMatch> {
        let parts: Vec<&str> = channel.split('/').collect();
        let mut params = HashMap::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Tail => {
                    return (i < parts.len()).then(|| ChannelMatch {
                        channel: channel.to_string(),
                        params,
                    });
                }
                _ if i >= parts.len() => return None,
                Segment::Literal(lit) if lit != parts[i] => return None,
                Segment::Literal(_) | Segment::Any => {}
                Segment::Param(name) => {
                    if parts[i].is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), parts[i].to_string());
                }
            }
        }

        (self.segments.len() == parts.len()).then(|| ChannelMatch {
            channel: channel.to_string(),
            params,
        })
    }
}

impl fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A channel identity together with the captures of the rule that matched it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMatch {
    pub channel: String,
    pub params: HashMap<String, String>,
}

impl ChannelMatch {
    /// Channel with no captures
    pub fn literal(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            params: HashMap::new(),
        }
    }
}

/// Destination channel template with `{name}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTemplate {
    raw: String,
    parts: Vec<TemplatePart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Text(String),
    Param(String),
}

impl ChannelTemplate {
    /// Parse a template and check every placeholder is a capture of `pattern`
    pub fn parse(template: &str, pattern: &ChannelPattern) -> Result<Self> {
        if template.is_empty() {
            return Err(PipelineError::config("destination channel is empty"));
        }

        let mut parts = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            let close = rest[open..].find('}').map(|c| open + c).ok_or_else(|| {
                PipelineError::config(format!("unclosed '{{' in channel template {template:?}"))
            })?;
            if open > 0 {
                parts.push(TemplatePart::Text(rest[..open].to_string()));
            }
            let name = &rest[open + 1..close];
            if !pattern.params().any(|p| p == name) {
                return Err(PipelineError::UnknownPatternParam {
                    template: template.to_string(),
                    param: name.to_string(),
                });
            }
            parts.push(TemplatePart::Param(name.to_string()));
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Text(rest.to_string()));
        }

        Ok(Self {
            raw: template.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Substitute captures from the matched channel
    pub fn expand(&self, matched: &ChannelMatch) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for part in &self.parts {
            match part {
                TemplatePart::Text(text) => out.push_str(text),
                TemplatePart::Param(name) => {
                    if let Some(value) = matched.params.get(name) {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_and_wildcards() {
        let pattern = ChannelPattern::parse("stream/*/cpu").unwrap();
        assert!(pattern.matches("stream/telegraf/cpu").is_some());
        assert!(pattern.matches("stream/telegraf/mem").is_none());
        assert!(pattern.matches("stream/telegraf/cpu/extra").is_none());

        let tail = ChannelPattern::parse("stream/telegraf/>").unwrap();
        assert!(tail.matches("stream/telegraf/cpu").is_some());
        assert!(tail.matches("stream/telegraf/cpu/core0").is_some());
        assert!(tail.matches("stream/telegraf").is_none());
    }

    #[test]
    fn test_captures() {
        let pattern = ChannelPattern::parse("stream/{source}/{metric}").unwrap();
        let matched = pattern.matches("stream/telegraf/cpu").unwrap();
        assert_eq!(matched.params["source"], "telegraf");
        assert_eq!(matched.params["metric"], "cpu");
    }

    #[test]
    fn test_invalid_patterns() {
        for bad in ["", "a//b", "a/>/b", "a/{x}/{x}", "a/b*", "a/{}"] {
            assert!(
                matches!(ChannelPattern::parse(bad), Err(PipelineError::InvalidPattern { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_template_expansion() {
        let pattern = ChannelPattern::parse("stream/telegraf/{metric}").unwrap();
        let template = ChannelTemplate::parse("alerts/{metric}/high", &pattern).unwrap();
        let matched = pattern.matches("stream/telegraf/cpu").unwrap();
        assert_eq!(template.expand(&matched), "alerts/cpu/high");
    }

    #[test]
    fn test_template_unknown_param() {
        let pattern = ChannelPattern::parse("stream/telegraf/{metric}").unwrap();
        let err = ChannelTemplate::parse("alerts/{host}", &pattern).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownPatternParam { .. }));
    }
}
