//! Transformation rules: typed model, persistence and natural-language parsing.
//!
//! - [`model`] - closed set of rule kinds with canonical descriptions
//! - [`store`] - rule sets persisted per bank scope
//! - [`heuristic`] - total keyword/pattern parser
//! - [`parser`] - delegated parsing with heuristic fallback

pub mod heuristic;
pub mod model;
pub mod parser;
pub mod store;

pub use heuristic::HeuristicParser;
pub use model::{rule_id, Condition, Rule, RuleKind, RuleOrigin, Stage};
pub use parser::{DelegatedStrategy, RuleParser, RuleRequest};
pub use store::{RuleStore, RULES_FILE};
