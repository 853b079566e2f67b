//! Transformation module.
//!
//! This module turns raw sheet rows into standard-field rows:
//! - Values: typed parsing of amounts and dates
//! - Operations: value operations used by custom rules
//! - Engine: rule application per file
//! - Pipeline: multi-file merge driver

pub mod engine;
pub mod operations;
pub mod pipeline;
pub mod values;

pub use engine::{CustomOp, DateRange, EngineOutput, RuleEngine, Sign, SkippedRow};
pub use operations::{apply_all, Operation};
pub use pipeline::*;
