//! # Live Pipeline Core
//!
//! Core types, strategy traits and pure pipeline stages for the rule-driven
//! live channel pipeline.
//!
//! A channel rule binds a channel pattern to an optional pipeline:
//! - **Converter**: raw payload bytes into frames (JSON, line protocol)
//! - **Processor**: keep/drop fields, chains
//! - **ConditionChecker**: numeric comparisons, AND/OR composites
//! - **Outputter**: side effects, implemented by the gateway runtime
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐
//! │ payload  │──►│ Converter │──►│ Processor │──►│ Outputter │
//! │ +channel │   └───────────┘   └───────────┘   └─────┬─────┘
//! └──────────┘                                         │
//!                                              ┌───────┴────────┐
//!                                              │ConditionChecker│
//!                                              └────────────────┘
//! ```

pub mod condition;
pub mod config;
pub mod converter;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod pattern;
pub mod processor;
pub mod rules;
pub mod strategy;

pub use config::*;
pub use error::*;
pub use frame::*;
pub use metrics::*;
pub use pattern::*;
pub use strategy::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::GatewayConfig;
    pub use crate::error::{PipelineError, Result, StageKind};
    pub use crate::frame::{Field, FieldType, FieldValues, Frame};
    pub use crate::pattern::{ChannelMatch, ChannelPattern, ChannelTemplate};
    pub use crate::rules::ChannelRulesDocument;
    pub use crate::strategy::{
        Broadcaster, ConditionChecker, ConvertContext, Converter, FrameStore, OutputContext,
        Outputter, Processor, RemoteWriter,
    };
}
