//! Fallback strategy selection and execution
//!
//! Maps a classified review-service failure and the attempt count to a
//! recovery action. Retryable strategies hand back a delay; terminal
//! strategies synthesize a response so callers always end up with something
//! structured, never a propagated error.

use crate::config::RetryConfig;
use crate::review::{Category, FileDescriptor, ReviewIssue, ReviewResponse, Severity};
use crate::validate::{backoff_delay, ErrorClass};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Function bodies longer than this are flagged by the degraded scan.
const MAX_FUNCTION_LINES: usize = 50;

/// Recovery action after a failed review attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Try again after a backoff delay.
    Retry,
    /// Retry with a reduced-scope prompt.
    Simplified,
    /// Give up on the model; run the local heuristic scan instead.
    Degraded,
    /// Give up; tell a human to review.
    Manual,
    /// Give up silently; the change was already authorized out-of-band.
    Emergency,
    /// No recovery needed.
    None,
}

impl FallbackStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackStrategy::Retry => "retry",
            FallbackStrategy::Simplified => "simplified",
            FallbackStrategy::Degraded => "degraded",
            FallbackStrategy::Manual => "manual",
            FallbackStrategy::Emergency => "emergency",
            FallbackStrategy::None => "none",
        }
    }
}

/// What the attempt loop should do next.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackDecision {
    pub strategy: FallbackStrategy,
    pub should_retry: bool,
    pub delay_ms: Option<u64>,
    /// Reduced-scope prompt for the next attempt (Simplified only).
    pub prompt: Option<String>,
    /// Terminal synthesized response (Degraded/Manual/Emergency only).
    pub response: Option<ReviewResponse>,
}

/// Pick a recovery strategy for a classified failure. First match applies.
pub fn decide(error: ErrorClass, attempt: u32, max_attempts: u32) -> FallbackStrategy {
    if attempt >= max_attempts {
        return FallbackStrategy::Manual;
    }
    match error {
        ErrorClass::Timeout => {
            if attempt < 2 {
                FallbackStrategy::Retry
            } else {
                FallbackStrategy::Simplified
            }
        }
        ErrorClass::RateLimit => FallbackStrategy::Retry,
        ErrorClass::Authentication => FallbackStrategy::Manual,
        ErrorClass::MalformedResponse => FallbackStrategy::Simplified,
        ErrorClass::Network => {
            if attempt < 2 {
                FallbackStrategy::Retry
            } else {
                FallbackStrategy::Manual
            }
        }
        ErrorClass::TokenLimit => FallbackStrategy::Simplified,
        ErrorClass::Unknown => FallbackStrategy::Manual,
    }
}

/// Execute a strategy, producing the decision the attempt loop acts on.
pub fn execute(
    strategy: FallbackStrategy,
    attempt: u32,
    retry: &RetryConfig,
    files: &[FileDescriptor],
) -> FallbackDecision {
    match strategy {
        FallbackStrategy::Retry => FallbackDecision {
            strategy,
            should_retry: true,
            delay_ms: Some(backoff_delay(attempt, retry).as_millis() as u64),
            prompt: None,
            response: None,
        },
        FallbackStrategy::Simplified => FallbackDecision {
            strategy,
            should_retry: true,
            delay_ms: Some(backoff_delay(attempt, retry).as_millis() as u64),
            prompt: Some(simplified_prompt()),
            response: None,
        },
        FallbackStrategy::Degraded => {
            let issues = heuristic_scan(files);
            let mut response = ReviewResponse::from_issues(issues);
            response.summary.degraded_mode = true;
            response.summary.fallback_mode = true;
            response
                .summary
                .notes
                .push("Automated review degraded to local heuristic scan".to_string());
            FallbackDecision {
                strategy,
                should_retry: false,
                delay_ms: None,
                prompt: None,
                response: Some(response),
            }
        }
        FallbackStrategy::Manual => {
            let issue = ReviewIssue::new(
                Severity::Low,
                Category::Standards,
                "Automated review could not complete; manual review required",
            )
            .with_recommendation(
                "Have a team member review this change before merging".to_string(),
            );
            let mut response = ReviewResponse::from_issues(vec![issue]);
            response.summary.fallback_mode = true;
            FallbackDecision {
                strategy,
                should_retry: false,
                delay_ms: None,
                prompt: None,
                response: Some(response),
            }
        }
        FallbackStrategy::Emergency => {
            let mut response = ReviewResponse::from_issues(Vec::new());
            response.summary.fallback_mode = true;
            response
                .summary
                .notes
                .push("Review bypassed under emergency procedure".to_string());
            FallbackDecision {
                strategy,
                should_retry: false,
                delay_ms: None,
                prompt: None,
                response: Some(response),
            }
        }
        FallbackStrategy::None => FallbackDecision {
            strategy,
            should_retry: false,
            delay_ms: None,
            prompt: None,
            response: None,
        },
    }
}

/// Reduced-scope instructions for a retry after timeouts or oversized output.
pub fn simplified_prompt() -> String {
    "Review the following changes for critical issues only. \
     Report HIGH severity security and logic problems. \
     Skip style, formatting, and minor suggestions. \
     Respond with a JSON object: {\"issues\": [...], \"summary\": {}}."
        .to_string()
}

fn safe_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|_| Regex::new("$^").unwrap())
}

/// Local keyword scan used in degraded mode. Deliberately shallow: it exists
/// to catch the worst offenders when no model is reachable, not to replace
/// a real review.
pub fn heuristic_scan(files: &[FileDescriptor]) -> Vec<ReviewIssue> {
    let credential_re = safe_regex(
        r#"(?i)\b(password|passwd|secret|api[_-]?key|auth[_-]?token)\s*[:=]\s*["'][^"']{4,}["']"#,
    );
    let debug_re = safe_regex(r"console\.(log|debug)\(|dbg!\(|binding\.pry|\bdebugger\b");
    let fn_start_re = safe_regex(r"^\s*(pub\s+)?(async\s+)?(fn|function)\s+\w+|=>\s*\{\s*$");

    let mut issues = Vec::new();
    for file in files {
        let path = file.path.display().to_string();
        for (i, line) in file.content.lines().enumerate() {
            let line_no = (i + 1) as u32;
            if line.contains("eval(") {
                issues.push(
                    ReviewIssue::new(
                        Severity::High,
                        Category::Security,
                        "Use of eval() on dynamic input",
                    )
                    .with_file(path.clone())
                    .with_line(line_no)
                    .with_recommendation("Avoid eval; parse or dispatch explicitly".to_string()),
                );
            }
            if line.contains("innerHTML") {
                issues.push(
                    ReviewIssue::new(
                        Severity::Medium,
                        Category::Security,
                        "Direct innerHTML assignment can introduce XSS",
                    )
                    .with_file(path.clone())
                    .with_line(line_no),
                );
            }
            if credential_re.is_match(line) {
                issues.push(
                    ReviewIssue::new(
                        Severity::High,
                        Category::Security,
                        "Possible hardcoded credential",
                    )
                    .with_file(path.clone())
                    .with_line(line_no)
                    .with_recommendation("Move secrets to environment or a vault".to_string()),
                );
            }
            if debug_re.is_match(line) {
                issues.push(
                    ReviewIssue::new(
                        Severity::Low,
                        Category::Standards,
                        "Stray debug statement",
                    )
                    .with_file(path.clone())
                    .with_line(line_no),
                );
            }
        }
        issues.extend(oversized_functions(&file.content, &path, &fn_start_re));
    }
    issues
}

/// Flag function bodies longer than [`MAX_FUNCTION_LINES`] by brace tracking
/// from each detected function start.
fn oversized_functions(content: &str, path: &str, fn_start_re: &Regex) -> Vec<ReviewIssue> {
    let lines: Vec<&str> = content.lines().collect();
    let mut issues = Vec::new();
    let mut depth: i64 = 0;
    let mut body_start: Option<usize> = None;

    for (i, line) in lines.iter().enumerate() {
        if body_start.is_none() && fn_start_re.is_match(line) && line.contains('{') {
            body_start = Some(i);
        }
        if body_start.is_some() {
            for c in line.chars() {
                match c {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            if depth <= 0 {
                if let Some(start) = body_start.take() {
                    let length = i - start + 1;
                    if length > MAX_FUNCTION_LINES {
                        issues.push(
                            ReviewIssue::new(
                                Severity::Medium,
                                Category::Standards,
                                format!("Function body spans {length} lines"),
                            )
                            .with_file(path.to_string())
                            .with_line((start + 1) as u32)
                            .with_recommendation(
                                "Split into smaller functions".to_string(),
                            ),
                        );
                    }
                }
                depth = 0;
            }
        }
    }
    issues
}
