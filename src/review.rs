//! Shared review types
//!
//! Severity/category vocabulary, review issues, and the file descriptors the
//! engine analyzes. These are the types every other module trades in.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Approximate tokens per character for prompt budgeting.
/// Coarse on purpose: the estimate only has to be stable, not exact.
pub const TOKENS_PER_CHAR: f64 = 0.25;

/// Severity of a review issue, ordered so `High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Ordinal used for threshold comparison (LOW=1, MEDIUM=2, HIGH=3).
    pub fn ordinal(&self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }

    /// Parse a severity label, case-insensitive.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            _ => None,
        }
    }
}

/// Canonical issue categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Security,
    Performance,
    Standards,
    Formatting,
    Logic,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Security => "Security",
            Category::Performance => "Performance",
            Category::Standards => "Standards",
            Category::Formatting => "Formatting",
            Category::Logic => "Logic",
        }
    }

    /// Parse a category label, case-insensitive.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "security" => Some(Category::Security),
            "performance" => Some(Category::Performance),
            "standards" => Some(Category::Standards),
            "formatting" => Some(Category::Formatting),
            "logic" => Some(Category::Logic),
            _ => None,
        }
    }
}

/// One finding from a review, real or synthesized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: Severity,
    pub category: Category,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl ReviewIssue {
    pub fn new(severity: Severity, category: Category, description: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            description: description.into(),
            file: None,
            line: None,
            recommendation: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

/// Issue counts per severity level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityBreakdown {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl SeverityBreakdown {
    /// Count issues from a list.
    pub fn from_issues(issues: &[ReviewIssue]) -> Self {
        let mut breakdown = Self::default();
        for issue in issues {
            match issue.severity {
                Severity::High => breakdown.high += 1,
                Severity::Medium => breakdown.medium += 1,
                Severity::Low => breakdown.low += 1,
            }
        }
        breakdown
    }

    /// Highest severity with a non-zero count, if any.
    pub fn highest(&self) -> Option<Severity> {
        if self.high > 0 {
            Some(Severity::High)
        } else if self.medium > 0 {
            Some(Severity::Medium)
        } else if self.low > 0 {
            Some(Severity::Low)
        } else {
            None
        }
    }

    /// Total count of issues at or above the given severity.
    pub fn count_at_or_above(&self, threshold: Severity) -> u32 {
        let mut total = self.high;
        if threshold <= Severity::Medium {
            total += self.medium;
        }
        if threshold <= Severity::Low {
            total += self.low;
        }
        total
    }

    pub fn total(&self) -> u32 {
        self.high + self.medium + self.low
    }
}

/// Summary block attached to every review response. Every field defaults:
/// the review service may return an empty or partial summary object, and
/// counts are recomputed from the issue list anyway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewSummary {
    pub total_issues: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    /// Set when the response was synthesized with all critical services down.
    pub offline_mode: bool,
    /// Set when the response was produced under partial service availability.
    pub degraded_mode: bool,
    /// Set when the issues came from fallback synthesis rather than the model.
    pub fallback_mode: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl ReviewSummary {
    pub fn from_breakdown(breakdown: SeverityBreakdown) -> Self {
        Self {
            total_issues: breakdown.total(),
            high: breakdown.high,
            medium: breakdown.medium,
            low: breakdown.low,
            ..Self::default()
        }
    }
}

/// A review result: findings plus their summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub issues: Vec<ReviewIssue>,
    pub summary: ReviewSummary,
}

impl ReviewResponse {
    /// Build a response from issues, deriving the summary.
    pub fn from_issues(issues: Vec<ReviewIssue>) -> Self {
        let summary = ReviewSummary::from_breakdown(SeverityBreakdown::from_issues(&issues));
        Self { issues, summary }
    }

    /// Recompute summary counts from the current issue list, keeping flags.
    pub fn recount(&mut self) {
        let breakdown = SeverityBreakdown::from_issues(&self.issues);
        self.summary.total_issues = breakdown.total();
        self.summary.high = breakdown.high;
        self.summary.medium = breakdown.medium;
        self.summary.low = breakdown.low;
    }

    pub fn breakdown(&self) -> SeverityBreakdown {
        SeverityBreakdown::from_issues(&self.issues)
    }
}

/// Estimate prompt tokens for a piece of text.
pub fn estimate_tokens(content: &str) -> u64 {
    (content.chars().count() as f64 * TOKENS_PER_CHAR).ceil() as u64
}

/// A changed file handed to the engine for review. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub content: String,
    pub estimated_tokens: u64,
}

impl FileDescriptor {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            size_bytes: content.len() as u64,
            estimated_tokens: estimate_tokens(&content),
            content,
        }
    }

    /// Override the size (useful when the caller has the on-disk size and
    /// only a truncated view of the content).
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }
}
