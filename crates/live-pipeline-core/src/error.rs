//! Error types for the live channel pipeline
//!
//! Uses `thiserror` for ergonomic error handling with full context preservation.
//! Errors fall into two classes: build-time errors raised while resolving a
//! channel rules document, and run-time errors raised while a message flows
//! through a resolved pipeline.

use std::fmt;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline stage kind, used to qualify configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Converter,
    Processor,
    Condition,
    Outputter,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Converter => "converter",
            Self::Processor => "processor",
            Self::Condition => "condition",
            Self::Outputter => "output",
        };
        f.write_str(name)
    }
}

/// Primary error type for all pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Discriminator names no known variant
    #[error("unknown {kind} type: {type_name}")]
    UnknownType { kind: StageKind, type_name: String },

    /// Discriminator is known but its payload is absent
    #[error("missing configuration for {type_name}")]
    MissingConfig { type_name: String },

    /// A payload other than the one named by the discriminator is populated
    #[error("configuration for {type_name} also sets {extra}")]
    ConflictingConfig { type_name: String, extra: String },

    /// `remoteWrite` references a backend that is not declared
    #[error("unknown remote write backend uid: {uid}")]
    UnknownRemoteWriteBackend { uid: String },

    /// Channel pattern could not be parsed
    #[error("invalid channel pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Same pattern declared by more than one rule
    #[error("duplicate channel pattern: {pattern}")]
    DuplicatePattern { pattern: String },

    /// Channel template references a capture the rule pattern does not define
    #[error("channel template {template:?} references unknown parameter {param:?}")]
    UnknownPatternParam { template: String, param: String },

    /// Configuration errors (malformed document, invalid settings)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Payload decoding errors
    #[error("Conversion error: {message}")]
    Convert {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Frame invariant violation
    #[error("Invalid frame: {message}")]
    Frame { message: String },

    /// Channel transport (broadcast) errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Remote write backend errors
    #[error("Remote write to {uid} failed: {message}")]
    RemoteWrite {
        uid: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Frame store errors
    #[error("Frame store error: {message}")]
    Store { message: String },

    /// Operation timeout
    #[error("Timeout: {operation} exceeded {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Per-channel queue is full
    #[error("Backpressure: {message}")]
    Backpressure { message: String },

    /// Failures collected from sibling outputters
    #[error("{} outputs failed: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<PipelineError>),

    /// Graceful shutdown requested
    #[error("Shutdown requested")]
    Shutdown,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_errors(errors: &[PipelineError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PipelineError {
    /// Create an unknown type error
    pub fn unknown_type(kind: StageKind, type_name: impl Into<String>) -> Self {
        Self::UnknownType {
            kind,
            type_name: type_name.into(),
        }
    }

    /// Create a missing configuration error
    pub fn missing_config(type_name: impl Into<String>) -> Self {
        Self::MissingConfig {
            type_name: type_name.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a conversion error
    pub fn convert(message: impl Into<String>) -> Self {
        Self::Convert {
            message: message.into(),
            source: None,
        }
    }

    /// Create a conversion error with source
    pub fn convert_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Convert {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a frame invariant error
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a remote write error with source
    pub fn remote_write_with_source(
        uid: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RemoteWrite {
            uid: uid.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Collapse collected sibling failures into a single error
    pub fn combine(mut errors: Vec<PipelineError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Check if error was raised while resolving configuration
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownType { .. }
                | Self::MissingConfig { .. }
                | Self::ConflictingConfig { .. }
                | Self::UnknownRemoteWriteBackend { .. }
                | Self::InvalidPattern { .. }
                | Self::DuplicatePattern { .. }
                | Self::UnknownPatternParam { .. }
                | Self::Configuration { .. }
        )
    }

    /// Check if error is transient (may resolve on its own)
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Backpressure { .. } | Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::RemoteWrite { .. } => true,
            Self::Multiple(errors) => errors.iter().all(|e| e.is_transient()),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_classification() {
        assert!(PipelineError::unknown_type(StageKind::Converter, "xml").is_build_error());
        assert!(PipelineError::missing_config("jsonExact").is_build_error());
        assert!(!PipelineError::convert("bad json").is_build_error());
        assert!(!PipelineError::timeout("remote write", 10).is_build_error());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            PipelineError::unknown_type(StageKind::Outputter, "kafka").to_string(),
            "unknown output type: kafka"
        );
        assert_eq!(
            PipelineError::missing_config("threshold").to_string(),
            "missing configuration for threshold"
        );
    }

    #[test]
    fn test_combine() {
        assert!(PipelineError::combine(Vec::new()).is_none());

        let single = PipelineError::combine(vec![PipelineError::transport("down")]).unwrap();
        assert!(matches!(single, PipelineError::Transport { .. }));

        let multiple = PipelineError::combine(vec![
            PipelineError::transport("down"),
            PipelineError::timeout("remote write", 50),
        ])
        .unwrap();
        assert!(multiple.is_transient());
        assert!(multiple.to_string().starts_with("2 outputs failed"));
    }
}
