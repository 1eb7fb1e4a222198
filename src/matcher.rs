//! External semantic matcher client.
//!
//! The matcher is a black box that maps an ambiguous query to file ids and
//! topics. Two providers:
//! - **[`DisabledMatcher`]** — returns errors; used when no matcher is configured.
//!   The identifier then degrades to static-table results.
//! - **[`HttpMatcher`]** — calls a JSON endpoint with retry and backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Responses are normalized defensively: `file_ids` and `matched_topics` are
//! coerced to string arrays and `explanation` is defaulted, so the contract
//! holds even when the matcher misbehaves.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::MatcherConfig;
use crate::error::RetrievalError;
use crate::models::MatchOutcome;

/// Request sent to the matcher, including conversational context.
#[derive(Debug, Clone, Serialize)]
pub struct MatchRequest {
    pub query: String,
    pub context: serde_json::Value,
    pub is_follow_up: bool,
    pub previous_query: Option<String>,
    pub previous_response: Option<String>,
}

/// Trait for semantic matcher providers.
#[async_trait]
pub trait SemanticMatcher: Send + Sync {
    /// Provider identifier (e.g. `"http"`).
    fn name(&self) -> &str;

    /// Resolve a query to file ids and topics.
    async fn match_query(&self, request: &MatchRequest) -> Result<MatchOutcome, RetrievalError>;
}

/// Instantiate the matcher configured in `[matcher]`.
pub fn create_matcher(config: &MatcherConfig) -> Result<Arc<dyn SemanticMatcher>, RetrievalError> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledMatcher)),
        "http" => {
            let url = config.url.clone().ok_or_else(|| {
                RetrievalError::MatcherUnavailable("matcher.url required for http provider".into())
            })?;
            Ok(Arc::new(HttpMatcher {
                url,
                timeout_secs: config.timeout_secs,
                max_retries: config.max_retries,
            }))
        }
        other => Err(RetrievalError::MatcherUnavailable(format!(
            "unknown matcher provider: {}",
            other
        ))),
    }
}

// ============ Disabled Provider ============

/// A no-op matcher that always reports itself unavailable.
pub struct DisabledMatcher;

#[async_trait]
impl SemanticMatcher for DisabledMatcher {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn match_query(&self, _request: &MatchRequest) -> Result<MatchOutcome, RetrievalError> {
        Err(RetrievalError::MatcherUnavailable(
            "matcher provider is disabled".into(),
        ))
    }
}

// ============ HTTP Provider ============

/// Matcher backed by a JSON HTTP endpoint.
pub struct HttpMatcher {
    url: String,
    timeout_secs: u64,
    max_retries: u32,
}

#[async_trait]
impl SemanticMatcher for HttpMatcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn match_query(&self, request: &MatchRequest) -> Result<MatchOutcome, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| RetrievalError::MatcherUnavailable(e.to_string()))?;

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client.post(&self.url).json(request).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| RetrievalError::MatcherUnavailable(e.to_string()))?;
                        return Ok(normalize_outcome(&json));
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(format!("matcher error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(RetrievalError::MatcherUnavailable(format!(
                        "matcher error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(RetrievalError::MatcherUnavailable(
            last_err.unwrap_or_else(|| "matcher failed after retries".into()),
        ))
    }
}

/// Coerce a matcher response into a well-typed [`MatchOutcome`]. Missing or
/// mistyped fields become empty arrays / a placeholder explanation.
pub fn normalize_outcome(json: &serde_json::Value) -> MatchOutcome {
    let string_array = |key: &str| -> Vec<String> {
        match json.get(key) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(serde_json::Value::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    };

    let explanation = json
        .get("explanation")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("No explanation provided by the matcher.")
        .to_string();

    MatchOutcome {
        file_ids: string_array("file_ids"),
        matched_topics: string_array("matched_topics"),
        explanation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_well_formed() {
        let outcome = normalize_outcome(&json!({
            "file_ids": ["wlb_1_2025"],
            "matched_topics": ["work_life_balance"],
            "explanation": "keyword overlap"
        }));
        assert_eq!(outcome.file_ids, vec!["wlb_1_2025"]);
        assert_eq!(outcome.matched_topics, vec!["work_life_balance"]);
        assert_eq!(outcome.explanation, "keyword overlap");
    }

    #[test]
    fn test_normalize_coerces_scalars_and_defaults() {
        let outcome = normalize_outcome(&json!({
            "file_ids": "wlb_1_2025",
            "matched_topics": null
        }));
        assert_eq!(outcome.file_ids, vec!["wlb_1_2025"]);
        assert!(outcome.matched_topics.is_empty());
        assert!(!outcome.explanation.is_empty());
    }

    #[test]
    fn test_normalize_drops_non_string_items() {
        let outcome = normalize_outcome(&json!({
            "file_ids": ["ok", 7, {"bad": true}],
            "matched_topics": [],
            "explanation": ""
        }));
        assert_eq!(outcome.file_ids, vec!["ok"]);
        assert_eq!(outcome.explanation, "No explanation provided by the matcher.");
    }

    #[tokio::test]
    async fn test_disabled_matcher_errors() {
        let matcher = DisabledMatcher;
        let request = MatchRequest {
            query: "anything".into(),
            context: json!({}),
            is_follow_up: false,
            previous_query: None,
            previous_response: None,
        };
        let err = matcher.match_query(&request).await.unwrap_err();
        assert!(matches!(err, RetrievalError::MatcherUnavailable(_)));
    }
}
