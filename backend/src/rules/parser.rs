//! Natural-language rule parsing.
//!
//! [`RuleParser`] composes two strategies:
//!
//! ```text
//!   text ──▶ delegated (optional, timed) ──▶ validate ──▶ Rule { nl_llm }
//!                 │ any failure (logged)
//!                 ▼
//!            heuristic (total) ───────────────────────▶ Rule { nl_heuristic }
//! ```
//!
//! The delegated path returns `Result<Rule, ParseFailure>`; `parse` itself
//! never fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::ai::{extract_json, AiClient, AiConfig};
use crate::api::logs::{log_info, log_warning};
use crate::error::{AiResult, ParseFailure};
use crate::rules::heuristic::HeuristicParser;
use crate::rules::model::{Rule, RuleKind, RuleOrigin};
use crate::schema::SchemaRegistry;
use crate::validation::validate_rule_object;

/// Time budget for a delegated call when none is configured.
pub const DEFAULT_DELEGATE_TIMEOUT: Duration = Duration::from_secs(20);

/// Request sent to the delegated strategy.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RuleRequest {
    pub instruction_text: String,
    pub bank_scope: String,
    pub available_standard_fields: Vec<String>,
}

/// An external completion capability returning raw model text.
pub trait DelegatedStrategy {
    fn complete(&self, request: &RuleRequest) -> impl Future<Output = AiResult<String>> + Send;
}

/// Rule parser with heuristic fallback.
pub struct RuleParser<D = AiClient> {
    schema: Arc<SchemaRegistry>,
    heuristic: HeuristicParser,
    delegated: Option<D>,
    timeout: Duration,
}

impl RuleParser<AiClient> {
    /// Parser without a delegated strategy.
    pub fn heuristic_only(schema: Arc<SchemaRegistry>) -> Self {
        Self {
            heuristic: HeuristicParser::new(schema.clone()),
            schema,
            delegated: None,
            timeout: DEFAULT_DELEGATE_TIMEOUT,
        }
    }

    /// Parser configured from `config`. The delegated strategy is attached
    /// only when enabled and a key is present.
    pub fn from_config(schema: Arc<SchemaRegistry>, config: &AiConfig) -> Self {
        let mut parser = Self::heuristic_only(schema);
        parser.timeout = config.timeout;
        if config.enabled {
            match AiClient::new(config.clone()) {
                Ok(client) => parser.delegated = Some(client),
                Err(e) => log_warning(format!("Delegated rule parsing unavailable: {}", e)),
            }
        }
        parser
    }
}

impl<D: DelegatedStrategy> RuleParser<D> {
    /// Parser with an explicit delegated strategy.
    pub fn with_delegate(schema: Arc<SchemaRegistry>, delegate: D, timeout: Duration) -> Self {
        Self {
            heuristic: HeuristicParser::new(schema.clone()),
            schema,
            delegated: Some(delegate),
            timeout,
        }
    }

    pub fn has_delegate(&self) -> bool {
        self.delegated.is_some()
    }

    /// Parse `text` into a rule of `bank_scope`.
    ///
    /// The returned rule's `created_from` names the strategy that produced it.
    pub async fn parse(&self, text: &str, bank_scope: &str) -> Rule {
        if self.delegated.is_some() {
            match self.parse_delegated(text, bank_scope).await {
                Ok(rule) => {
                    log_info(format!("Rule parsed by model: {}", rule.describe()));
                    return rule;
                }
                Err(failure) => {
                    log_warning(format!("Delegated rule parse failed, using heuristics: {}", failure));
                }
            }
        }
        self.heuristic.parse(text, bank_scope)
    }

    /// Parse with the heuristic strategy only.
    pub fn parse_heuristic(&self, text: &str, bank_scope: &str) -> Rule {
        self.heuristic.parse(text, bank_scope)
    }

    /// Run the delegated strategy and validate its answer.
    pub async fn parse_delegated(&self, text: &str, bank_scope: &str) -> Result<Rule, ParseFailure> {
        let delegate = self.delegated.as_ref().ok_or(ParseFailure::Disabled)?;
        let request = RuleRequest {
            instruction_text: text.to_string(),
            bank_scope: bank_scope.to_string(),
            available_standard_fields: self.schema.names(),
        };

        let response = tokio::time::timeout(self.timeout, delegate.complete(&request))
            .await
            .map_err(|_| ParseFailure::Timeout(self.timeout))??;

        let kind = self.validate_response(&response)?;
        Ok(Rule::new(bank_scope, kind, RuleOrigin::NlLlm))
    }

    /// Check a raw model answer against the rule contract.
    pub fn validate_response(&self, response: &str) -> Result<RuleKind, ParseFailure> {
        let json = extract_json(response);
        let value: Value = serde_json::from_str(&json).map_err(|e| ParseFailure::MalformedJson(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| ParseFailure::MalformedJson("expected a JSON object".to_string()))?;

        let type_name = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseFailure::UnknownType("<missing>".to_string()))?;
        let (required, optional) =
            RuleKind::parameters(type_name).ok_or_else(|| ParseFailure::UnknownType(type_name.to_string()))?;

        if let Some(param) = required.iter().find(|p| !object.contains_key(**p)) {
            return Err(ParseFailure::MissingParameter {
                kind: type_name.to_string(),
                param: param.to_string(),
            });
        }
        if let Some(param) = object
            .keys()
            .find(|k| k.as_str() != "type" && !required.contains(&k.as_str()) && !optional.contains(&k.as_str()))
        {
            return Err(ParseFailure::UnexpectedParameter {
                kind: type_name.to_string(),
                param: param.clone(),
            });
        }

        validate_rule_object(&value).map_err(|errors| ParseFailure::SchemaViolation(errors.join("; ")))?;

        let kind: RuleKind =
            serde_json::from_value(value.clone()).map_err(|e| ParseFailure::SchemaViolation(e.to_string()))?;

        if let Some(field) = kind.target_fields().into_iter().find(|f| !self.schema.contains(f)) {
            return Err(ParseFailure::UnknownField(field.to_string()));
        }
        Ok(kind)
    }
}
