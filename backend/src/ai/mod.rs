//! AI module for delegated rule parsing
//!
//! Uses the Anthropic messages API to turn a natural-language instruction
//! into a rule object. The client is only the transport: validation and
//! fallback live in [`crate::rules::RuleParser`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledgermerge::ai::{AiClient, AiConfig};
//!
//! let config = AiConfig::from_env();
//! let client = AiClient::new(config)?;
//! ```

pub mod prompt;

use std::env;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::api::logs::{log_info, log_warning};
use crate::error::{AiError, AiResult};
use crate::rules::{DelegatedStrategy, RuleRequest};

pub use prompt::{system_prompt, user_prompt};

/// Default messages endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

/// Default model
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Bounds of the per-call time budget, in seconds
const MIN_TIMEOUT_SECS: u64 = 10;
const MAX_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Default number of retries
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Delay between retries in milliseconds
const RETRY_DELAY_MS: u64 = 500;

/// Delegated parsing configuration, passed explicitly to the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct AiConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    /// Budget for one delegated parse, retries included.
    pub timeout: Duration,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl AiConfig {
    /// Read the configuration from the environment (and `.env`).
    ///
    /// Delegation is enabled by `LEDGERMERGE_AI_ENABLED`, or implicitly when
    /// an API key is present and the flag is unset.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let api_key = env::var("LEDGERMERGE_AI_API_KEY")
            .or_else(|_| env::var("ANTHROPIC_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        let enabled = match env::var("LEDGERMERGE_AI_ENABLED") {
            Ok(flag) => parse_flag(&flag),
            Err(_) => api_key.is_some(),
        };
        let timeout = env::var("LEDGERMERGE_AI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(clamp_timeout)
            .unwrap_or(defaults.timeout);

        Self {
            enabled,
            api_key,
            endpoint: env::var("LEDGERMERGE_AI_ENDPOINT").unwrap_or(defaults.endpoint),
            model: env::var("LEDGERMERGE_AI_MODEL").unwrap_or(defaults.model),
            max_tokens: defaults.max_tokens,
            timeout,
        }
    }

    /// Disabled configuration.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = clamp_timeout(secs);
        self
    }
}

/// Truthy environment flag.
pub(crate) fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn clamp_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS))
}

/// Anthropic API client
#[derive(Clone)]
pub struct AiClient {
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    http: reqwest::Client,
}

/// Anthropic API response structure
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

/// Anthropic API error response
#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl AiClient {
    /// Create a client from configuration. Fails without an API key.
    pub fn new(config: AiConfig) -> AiResult<Self> {
        let api_key = config.api_key.ok_or(AiError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AiError::HttpError(e.to_string()))?;

        Ok(Self {
            api_key,
            endpoint: config.endpoint,
            model: config.model,
            max_tokens: config.max_tokens,
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Request a rule object for `request` (with retries)
    pub async fn complete_rule(&self, request: &RuleRequest) -> AiResult<String> {
        let mut last_error = None;

        for attempt in 1..=DEFAULT_MAX_RETRIES {
            match self.call_api(request).await {
                Ok(text) => return Ok(text),
                // a client error will not improve on retry
                Err(e @ AiError::ApiError { status: 400..=499, .. }) => return Err(e),
                Err(e) => {
                    log_warning(format!("Attempt {}/{} failed: {}", attempt, DEFAULT_MAX_RETRIES, e));
                    last_error = Some(e);

                    if attempt < DEFAULT_MAX_RETRIES {
                        tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AiError::InvalidResponse("no attempt made".to_string())))
    }

    /// Call Anthropic API
    async fn call_api(&self, request: &RuleRequest) -> AiResult<String> {
        log_info(format!("Calling rule model {} for '{}'", self.model, request.bank_scope));

        let request_body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0,
            "system": prompt::system_prompt(),
            "messages": prompt::build_messages(request)
        });

        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout
                } else {
                    AiError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AiError::HttpError(e.to_string()))?;

        if !status.is_success() {
            let body = match serde_json::from_str::<AnthropicError>(&body) {
                Ok(error) => error.error.message,
                Err(_) => body,
            };
            return Err(AiError::ApiError { status: status.as_u16(), body });
        }

        let response: AnthropicResponse =
            serde_json::from_str(&body).map_err(|e| AiError::InvalidResponse(e.to_string()))?;

        let text = response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(AiError::InvalidResponse("Empty response".to_string()));
        }
        Ok(text)
    }
}

impl DelegatedStrategy for AiClient {
    fn complete(&self, request: &RuleRequest) -> impl Future<Output = AiResult<String>> + Send {
        self.complete_rule(request)
    }
}

/// Extract JSON from a response that may contain markdown code blocks
pub fn extract_json(text: &str) -> String {
    // Try to find JSON in code block
    if let Some(start) = text.find("```json") {
        let json_start = start + 7; // len of "```json"
        if let Some(end) = text[json_start..].find("```") {
            return text[json_start..json_start + end].trim().to_string();
        }
    }

    // Try to find JSON in generic code block
    if let Some(start) = text.find("```") {
        let after_start = start + 3;
        // Skip language identifier if present
        let content_start = text[after_start..]
            .find('\n')
            .map(|i| after_start + i + 1)
            .unwrap_or(after_start);

        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim().to_string();
        }
    }

    // Try to find raw JSON object
    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if start < end {
                return text[start..=end].to_string();
            }
        }
    }

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_code_block() {
        let response = r#"Here's the rule:

```json
{
  "type": "page_break",
  "every_n_rows": 50
}
```

Done!"#;

        let json = extract_json(response);
        assert!(json.starts_with('{'));
        assert!(json.contains("\"every_n_rows\""));
        assert!(json.ends_with('}'));
    }

    #[test]
    fn test_extract_json_from_generic_block() {
        let response = "```\n{\"type\": \"custom\", \"raw_description\": \"x\"}\n```";
        assert_eq!(extract_json(response), "{\"type\": \"custom\", \"raw_description\": \"x\"}");
    }

    #[test]
    fn test_extract_raw_json() {
        let response = r#"{"type": "page_break", "every_n_rows": 5}"#;
        assert_eq!(extract_json(response), response);

        let chatty = r#"Sure: {"type": "page_break", "every_n_rows": 5} hope it helps"#;
        assert_eq!(extract_json(chatty), response);
    }

    #[test]
    fn test_client_requires_key() {
        let config = AiConfig { enabled: true, ..AiConfig::default() };
        assert!(matches!(AiClient::new(config), Err(AiError::MissingApiKey)));

        let config = AiConfig {
            enabled: true,
            api_key: Some("sk-test".to_string()),
            ..AiConfig::default()
        };
        let client = AiClient::new(config).unwrap();
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_timeout_is_clamped() {
        assert_eq!(AiConfig::default().with_timeout_secs(1).timeout, Duration::from_secs(10));
        assert_eq!(AiConfig::default().with_timeout_secs(120).timeout, Duration::from_secs(30));
        assert_eq!(AiConfig::default().with_timeout_secs(15).timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }
}
