//! Review response validation and repair
//!
//! The review service returns structured JSON in the happy path, but models
//! drift: fields go missing, enums arrive misspelled, arrays come back as
//! prose. Validation classifies the damage; repair salvages what it can
//! without ever failing itself. Failure classification and backoff for the
//! retry loop live here too, since they are all facets of the same concern:
//! deciding what a bad response means for the next attempt.

use crate::config::RetryConfig;
use crate::review::{Category, Severity};
use rand::Rng;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Fields a top-level response must carry.
pub const DEFAULT_REQUIRED_FIELDS: &[&str] = &["issues", "summary"];

/// Placeholder used when an issue arrives without a description.
const MISSING_DESCRIPTION: &str = "No description provided";

/// Outcome of validating one response. Transient, computed per response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub retryable: bool,
    pub fallback_needed: bool,
}

/// Validate the shape of a review-service response against the default
/// required fields.
pub fn validate_response(response: &Value) -> ResponseValidation {
    validate_response_with_fields(response, DEFAULT_REQUIRED_FIELDS)
}

/// Validate the shape of a review-service response.
///
/// Structural problems are errors (and retryable); an unrecognized category
/// is only a warning, since repair can default it.
pub fn validate_response_with_fields(response: &Value, required: &[&str]) -> ResponseValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(object) = response.as_object() else {
        return ResponseValidation {
            is_valid: false,
            errors: vec!["Response must be a JSON object".to_string()],
            warnings,
            retryable: true,
            fallback_needed: true,
        };
    };

    for field in required {
        if !object.contains_key(*field) {
            errors.push(format!("Missing required field: {field}"));
        }
    }

    if let Some(issues) = object.get("issues") {
        match issues.as_array() {
            None => errors.push("Issues field must be an array".to_string()),
            Some(list) => {
                for (i, issue) in list.iter().enumerate() {
                    validate_issue(i, issue, &mut errors, &mut warnings);
                }
            }
        }
    }

    if let Some(summary) = object.get("summary") {
        if !summary.is_object() {
            errors.push("Summary field must be an object".to_string());
        }
    }

    let is_valid = errors.is_empty();
    ResponseValidation {
        is_valid,
        retryable: !is_valid,
        fallback_needed: !is_valid || !warnings.is_empty(),
        errors,
        warnings,
    }
}

fn validate_issue(index: usize, issue: &Value, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let Some(object) = issue.as_object() else {
        errors.push(format!("Issue {index} must be an object"));
        return;
    };

    for field in ["severity", "category", "description"] {
        if !object.contains_key(field) {
            errors.push(format!("Issue {index} missing required field: {field}"));
        }
    }

    if let Some(severity) = object.get("severity") {
        let valid = severity.as_str().and_then(Severity::parse).is_some();
        if !valid {
            errors.push(format!("Issue {index} has invalid severity: {severity}"));
        }
    }

    if let Some(category) = object.get("category") {
        let recognized = category.as_str().and_then(Category::parse).is_some();
        if !recognized {
            warnings.push(format!("Issue {index} has unrecognized category: {category}"));
        }
    }
}

/// Repair a validation-flagged response. Never fails: malformed optional
/// fields are dropped, missing enums are defaulted, and summary counts are
/// recomputed from the repaired issue list. Returns `None` only when the
/// top-level response is not an object, which the caller must treat as fatal.
pub fn fix_response(response: &Value) -> Option<Value> {
    let object = response.as_object()?;

    let issues: Vec<Value> = object
        .get("issues")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(fix_issue).collect())
        .unwrap_or_default();

    let mut high = 0u32;
    let mut medium = 0u32;
    let mut low = 0u32;
    for issue in &issues {
        match issue.get("severity").and_then(Value::as_str) {
            Some("HIGH") => high += 1,
            Some("MEDIUM") => medium += 1,
            _ => low += 1,
        }
    }

    // Keep non-count summary keys (mode flags and such); overwrite counts.
    let mut summary = object
        .get("summary")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    summary.insert("total_issues".to_string(), json!(issues.len()));
    summary.insert("high".to_string(), json!(high));
    summary.insert("medium".to_string(), json!(medium));
    summary.insert("low".to_string(), json!(low));

    let mut fixed = object.clone();
    fixed.insert("issues".to_string(), Value::Array(issues));
    fixed.insert("summary".to_string(), Value::Object(summary));
    Some(Value::Object(fixed))
}

fn fix_issue(issue: &Value) -> Option<Value> {
    let object = issue.as_object()?;

    let severity = object
        .get("severity")
        .and_then(Value::as_str)
        .and_then(Severity::parse)
        .unwrap_or(Severity::Medium);
    let category = object
        .get("category")
        .and_then(Value::as_str)
        .and_then(Category::parse)
        .unwrap_or(Category::Standards);
    let description = object
        .get("description")
        .and_then(Value::as_str)
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(MISSING_DESCRIPTION);

    let mut fixed = Map::new();
    fixed.insert("severity".to_string(), json!(severity.as_str()));
    fixed.insert("category".to_string(), json!(category.as_str()));
    fixed.insert("description".to_string(), json!(description));

    // Optional fields survive only in well-formed shape.
    if let Some(file) = object.get("file").and_then(Value::as_str) {
        fixed.insert("file".to_string(), json!(file));
    }
    if let Some(line) = object.get("line").and_then(Value::as_u64) {
        if line > 0 && line <= u32::MAX as u64 {
            fixed.insert("line".to_string(), json!(line));
        }
    }
    if let Some(rec) = object.get("recommendation").and_then(Value::as_str) {
        fixed.insert("recommendation".to_string(), json!(rec));
    }

    Some(Value::Object(fixed))
}

/// Strip markdown code fences from model output.
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if trimmed.starts_with("```json") {
        trimmed.strip_prefix("```json").unwrap_or(trimmed)
    } else if trimmed.starts_with("```") {
        trimmed.strip_prefix("```").unwrap_or(trimmed)
    } else {
        trimmed
    };
    let clean = if clean.ends_with("```") {
        clean.strip_suffix("```").unwrap_or(clean)
    } else {
        clean
    };
    clean.trim()
}

/// Fix common JSON slips in model output: trailing commas, smart quotes,
/// stray control characters.
fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();
    fixed = fixed.replace(",]", "]");
    fixed = fixed.replace(",}", "}");
    fixed = fixed.replace('\u{201C}', "\"");
    fixed = fixed.replace('\u{201D}', "\"");
    fixed = fixed.replace('\u{2018}', "'");
    fixed = fixed.replace('\u{2019}', "'");
    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Extract and parse a JSON object from raw model text, tolerating fences
/// and surrounding prose. Returns `None` when no object can be recovered.
pub fn parse_model_text(raw: &str) -> Option<Value> {
    let clean = strip_markdown_fences(raw);
    let start = clean.find('{')?;
    let end = clean.rfind('}')?;
    if start > end {
        return None;
    }
    let fragment = fix_json_issues(&clean[start..=end]);
    serde_json::from_str(&fragment).ok()
}

/// Classified failure from the review service, derived deterministically
/// from the error text. First match wins in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Timeout,
    RateLimit,
    Authentication,
    MalformedResponse,
    Network,
    TokenLimit,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::Authentication => "authentication",
            ErrorClass::MalformedResponse => "malformed_response",
            ErrorClass::Network => "network",
            ErrorClass::TokenLimit => "token_limit",
            ErrorClass::Unknown => "unknown",
        }
    }
}

/// Classify an error for the fallback strategist.
pub fn classify_error(error: &anyhow::Error) -> ErrorClass {
    classify_error_message(&error.to_string())
}

/// Classify an error message by keyword. Match order is fixed: timeout,
/// rate limit, authentication, malformed response, network, token limit.
pub fn classify_error_message(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();

    const TABLE: &[(ErrorClass, &[&str])] = &[
        (ErrorClass::Timeout, &["timeout", "timed out", "timed-out", "deadline exceeded"]),
        (
            ErrorClass::RateLimit,
            &["rate limit", "rate-limit", "429", "too many requests"],
        ),
        (
            ErrorClass::Authentication,
            &["unauthorized", "authentication", "401", "403", "forbidden", "api key"],
        ),
        (
            ErrorClass::MalformedResponse,
            &["malformed", "unexpected token", "parse", "invalid json", "json"],
        ),
        (
            ErrorClass::Network,
            &["network", "connection", "econnreset", "econnrefused", "dns", "socket"],
        ),
        (
            ErrorClass::TokenLimit,
            &["token limit", "context length", "maximum context", "too long"],
        ),
    ];

    for (class, keywords) in TABLE {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *class;
        }
    }
    ErrorClass::Unknown
}

/// Whether an error is worth retrying at all, independent of strategy.
pub fn is_retryable_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    const RETRYABLE: &[&str] = &[
        "timeout",
        "timed-out",
        "timed out",
        "network",
        "connection-reset",
        "connection-refused",
        "connection",
        "not-found",
        "rate limit",
        "temporary",
        "service unavailable",
    ];
    RETRYABLE.iter().any(|k| lower.contains(k))
}

/// Exponential backoff with jitter, capped at the configured ceiling.
///
/// `delay(attempt) = min(base * 2^(attempt-1) * (1 + jitter), max)` with
/// jitter uniform in [0, 0.1]. Attempts are 1-based.
pub fn backoff_delay(attempt: u32, retry: &RetryConfig) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..=0.1);
    backoff_delay_with_jitter(attempt, retry, jitter)
}

fn backoff_delay_with_jitter(attempt: u32, retry: &RetryConfig, jitter: f64) -> Duration {
    let exponent = attempt.max(1).saturating_sub(1).min(20);
    let scaled = retry.retry_delay_ms as f64 * 2f64.powi(exponent as i32) * (1.0 + jitter);
    Duration::from_millis(scaled.min(retry.max_retry_delay_ms as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_response_is_fatal_but_retryable() {
        let validation = validate_response(&Value::Null);
        assert!(!validation.is_valid);
        assert!(validation.retryable);
        assert!(validation.fallback_needed);
    }

    #[test]
    fn test_array_response_is_rejected() {
        let validation = validate_response(&json!([1, 2]));
        assert!(!validation.is_valid);
        assert_eq!(validation.errors, vec!["Response must be a JSON object"]);
    }

    #[test]
    fn test_issues_must_be_an_array() {
        let validation = validate_response(&json!({"issues": "not array", "summary": {}}));
        assert!(!validation.is_valid);
        assert!(validation.retryable);
        assert!(validation
            .errors
            .iter()
            .any(|e| e == "Issues field must be an array"));
    }

    #[test]
    fn test_missing_required_field() {
        let validation = validate_response(&json!({"issues": []}));
        assert!(!validation.is_valid);
        assert!(validation
            .errors
            .iter()
            .any(|e| e == "Missing required field: summary"));
    }

    #[test]
    fn test_invalid_severity_is_error_unknown_category_is_warning() {
        let response = json!({
            "issues": [
                {"severity": "CRITICAL", "category": "Security", "description": "x"},
                {"severity": "HIGH", "category": "Vibes", "description": "y"},
            ],
            "summary": {},
        });
        let validation = validate_response(&response);
        assert!(!validation.is_valid);
        assert_eq!(validation.errors.len(), 1);
        assert_eq!(validation.warnings.len(), 1);
    }

    #[test]
    fn test_warning_only_response_is_valid_but_needs_repair() {
        let response = json!({
            "issues": [{"severity": "LOW", "category": "style", "description": "tabs"}],
            "summary": {},
        });
        let validation = validate_response(&response);
        assert!(validation.is_valid);
        assert!(!validation.retryable);
        assert!(validation.fallback_needed);
    }

    #[test]
    fn test_clean_response() {
        let response = json!({
            "issues": [{"severity": "LOW", "category": "Formatting", "description": "tabs"}],
            "summary": {},
        });
        let validation = validate_response(&response);
        assert!(validation.is_valid);
        assert!(!validation.fallback_needed);
    }

    #[test]
    fn test_fix_response_defaults_and_drops() {
        let response = json!({
            "issues": [
                {"severity": "CRITICAL", "category": "nope", "line": -4},
                "not an object",
                {"severity": "HIGH", "category": "Security", "description": "eval", "line": 12},
            ],
            "summary": {"offline_mode": true},
        });
        let fixed = fix_response(&response).unwrap();
        let issues = fixed["issues"].as_array().unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0]["severity"], "MEDIUM");
        assert_eq!(issues[0]["category"], "Standards");
        assert_eq!(issues[0]["description"], MISSING_DESCRIPTION);
        assert!(issues[0].get("line").is_none());
        assert_eq!(issues[1]["line"], 12);
        assert_eq!(fixed["summary"]["total_issues"], 2);
        assert_eq!(fixed["summary"]["high"], 1);
        // Non-count summary keys survive repair.
        assert_eq!(fixed["summary"]["offline_mode"], true);
    }

    #[test]
    fn test_fix_response_is_idempotent() {
        let response = json!({
            "issues": [{"severity": "bogus"}, {"severity": "LOW", "category": "Logic", "description": "off by one"}],
            "summary": "not an object",
        });
        let once = fix_response(&response).unwrap();
        let twice = fix_response(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_fix_response_refuses_non_object() {
        assert!(fix_response(&Value::Null).is_none());
        assert!(fix_response(&json!([1])).is_none());
    }

    #[test]
    fn test_fixed_response_passes_validation() {
        let response = json!({"issues": "garbage"});
        let fixed = fix_response(&response).unwrap();
        assert!(validate_response(&fixed).is_valid);
    }

    #[test]
    fn test_parse_model_text_strips_fences_and_prose() {
        let raw = "Here you go:\n```json\n{\"issues\": [], \"summary\": {},}\n```\nHope that helps!";
        let parsed = parse_model_text(raw).unwrap();
        assert!(parsed["issues"].as_array().unwrap().is_empty());
        assert!(parse_model_text("no json here").is_none());
    }

    #[test]
    fn test_classification_order() {
        assert_eq!(classify_error_message("Request timeout"), ErrorClass::Timeout);
        assert_eq!(
            classify_error_message("429 Too Many Requests"),
            ErrorClass::RateLimit
        );
        assert_eq!(
            classify_error_message("401 Unauthorized"),
            ErrorClass::Authentication
        );
        assert_eq!(
            classify_error_message("could not parse response"),
            ErrorClass::MalformedResponse
        );
        assert_eq!(
            classify_error_message("connection refused"),
            ErrorClass::Network
        );
        assert_eq!(
            classify_error_message("prompt exceeds maximum context"),
            ErrorClass::TokenLimit
        );
        assert_eq!(classify_error_message("nope"), ErrorClass::Unknown);
        // Timeout outranks rate limit when both keywords appear.
        assert_eq!(
            classify_error_message("rate limit check timed out"),
            ErrorClass::Timeout
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(is_retryable_error("network unreachable"));
        assert!(is_retryable_error("rate limit hit"));
        assert!(is_retryable_error("service unavailable"));
        assert!(!is_retryable_error("invalid api key"));
    }

    #[test]
    fn test_backoff_monotone_and_capped() {
        let retry = RetryConfig::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=8 {
            // Worst case for monotonicity: max jitter then zero jitter.
            let low = backoff_delay_with_jitter(attempt, &retry, 0.0);
            let high = backoff_delay_with_jitter(attempt, &retry, 0.1);
            assert!(low >= previous, "attempt {attempt} decreased");
            assert!(high <= Duration::from_millis(retry.max_retry_delay_ms));
            previous = high.min(Duration::from_millis(retry.max_retry_delay_ms));
        }
        assert_eq!(
            backoff_delay_with_jitter(1, &retry, 0.0),
            Duration::from_millis(1000)
        );
        assert_eq!(
            backoff_delay_with_jitter(10, &retry, 0.05),
            Duration::from_millis(10_000)
        );
    }
}
