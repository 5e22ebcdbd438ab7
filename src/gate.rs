//! Quality gate evaluation
//!
//! Decides whether a review result may block a production change. The gate
//! fails closed: any internal error during evaluation blocks the change with
//! a reason rather than waving it through. Urgent overrides are honored via
//! a keyword in the commit message, rate-limited per author per calendar day.

use crate::audit::{AuditContext, AuditSink};
use crate::config::GatePolicy;
use crate::review::{Severity, SeverityBreakdown};
use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Branch and environment names treated as production.
const PRODUCTION_NAMES: &[&str] = &["main", "master", "production", "prod", "live"];

/// The review result facts the gate needs to rule on a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub severity_breakdown: SeverityBreakdown,
    pub commit_message: String,
    pub commit_author: String,
    pub target_branch: String,
}

/// Pass/block decision for one change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub passed: bool,
    pub blocked: bool,
    pub reason: String,
    pub override_used: bool,
    /// Set when the override keyword was present but the author's daily
    /// quota was already spent.
    pub override_limit_exceeded: bool,
    pub highest_severity: Option<Severity>,
    pub issues_found: u32,
    pub evaluation_time_ms: u64,
}

impl QualityGateResult {
    fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            blocked: false,
            reason: reason.into(),
            override_used: false,
            override_limit_exceeded: false,
            highest_severity: None,
            issues_found: 0,
            evaluation_time_ms: 0,
        }
    }
}

/// Per-author, per-calendar-date override counts. Grows monotonically within
/// a date; a new date key is implicitly a fresh counter. Process-lifetime
/// state, cleared only explicitly. Multi-instance deployments must back this
/// with an external store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideLedger {
    counts: HashMap<String, HashMap<NaiveDate, u32>>,
}

impl OverrideLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides already used by `author` on `date`.
    pub fn count(&self, author: &str, date: NaiveDate) -> u32 {
        self.counts
            .get(author)
            .and_then(|days| days.get(&date))
            .copied()
            .unwrap_or(0)
    }

    /// Record one consumed override.
    pub fn record(&mut self, author: &str, date: NaiveDate) -> u32 {
        let entry = self
            .counts
            .entry(author.to_string())
            .or_default()
            .entry(date)
            .or_insert(0);
        *entry += 1;
        *entry
    }

    /// Drop all recorded overrides.
    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

/// The quality gate. Owns the override ledger so callers can persist or
/// inject it for multi-instance deployments.
#[derive(Debug)]
pub struct QualityGate {
    policy: GatePolicy,
    ledger: OverrideLedger,
}

impl QualityGate {
    pub fn new(policy: GatePolicy) -> Self {
        Self {
            policy,
            ledger: OverrideLedger::new(),
        }
    }

    pub fn with_ledger(policy: GatePolicy, ledger: OverrideLedger) -> Self {
        Self { policy, ledger }
    }

    pub fn ledger(&self) -> &OverrideLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut OverrideLedger {
        &mut self.ledger
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Evaluate a review verdict against the policy.
    ///
    /// Never returns an error: an internal failure converts to a blocked
    /// result with the failure in the reason string.
    pub fn evaluate(
        &mut self,
        verdict: &ReviewVerdict,
        environment: &str,
        audit: &dyn AuditSink,
    ) -> QualityGateResult {
        let started = Instant::now();
        let context = AuditContext {
            author: verdict.commit_author.clone(),
            branch: verdict.target_branch.clone(),
            environment: environment.to_string(),
        };
        audit.log_quality_gate_start(&context);

        let mut result = match self.evaluate_inner(verdict, environment, audit, &context) {
            Ok(result) => result,
            Err(err) => {
                // Fail closed: an evaluation bug must not unblock production.
                audit.log_error("quality_gate_evaluation_failed", &err.to_string(), &context);
                QualityGateResult {
                    passed: false,
                    blocked: true,
                    reason: format!("Quality gate evaluation failed; blocking by policy: {err}"),
                    override_used: false,
                    override_limit_exceeded: false,
                    highest_severity: None,
                    issues_found: 0,
                    evaluation_time_ms: 0,
                }
            }
        };
        result.evaluation_time_ms = started.elapsed().as_millis() as u64;
        audit.log_quality_gate_decision(&result.reason, result.blocked, &context);
        result
    }

    fn evaluate_inner(
        &mut self,
        verdict: &ReviewVerdict,
        environment: &str,
        audit: &dyn AuditSink,
        context: &AuditContext,
    ) -> anyhow::Result<QualityGateResult> {
        if !self.policy.enabled {
            return Ok(QualityGateResult::pass("Quality gates are disabled"));
        }

        let production =
            is_production_name(&verdict.target_branch) || is_production_name(environment);
        if !production || !self.policy.block_production {
            return Ok(QualityGateResult::pass(
                "Target is not a production branch; gate not enforced",
            ));
        }

        let mut override_limit_exceeded = false;
        if self.policy.allow_urgent_override
            && message_has_keyword(&verdict.commit_message, &self.policy.urgent_keyword)?
        {
            let today = Utc::now().date_naive();
            let used = self.ledger.count(&verdict.commit_author, today);
            if used < self.policy.max_overrides_per_day {
                let used_now = self.ledger.record(&verdict.commit_author, today);
                let remaining = self.policy.max_overrides_per_day - used_now;
                audit.log_override_attempt(&self.policy.urgent_keyword, true, remaining, context);
                return Ok(QualityGateResult {
                    passed: true,
                    blocked: false,
                    reason: format!(
                        "Urgent override accepted ({} of {} daily overrides remaining)",
                        remaining, self.policy.max_overrides_per_day
                    ),
                    override_used: true,
                    override_limit_exceeded: false,
                    highest_severity: verdict.severity_breakdown.highest(),
                    // The override waives blocking, not the findings.
                    issues_found: verdict
                        .severity_breakdown
                        .count_at_or_above(self.policy.severity_threshold),
                    evaluation_time_ms: 0,
                });
            }
            // Over quota: fall through to severity evaluation without
            // consuming anything.
            override_limit_exceeded = true;
            audit.log_override_attempt(&self.policy.urgent_keyword, false, 0, context);
        }

        let threshold = self.policy.severity_threshold;
        let highest = verdict.severity_breakdown.highest();
        let blocked = highest
            .map(|severity| severity.ordinal() >= threshold.ordinal())
            .unwrap_or(false);
        let issues_found = verdict.severity_breakdown.count_at_or_above(threshold);

        let reason = if blocked {
            format!(
                "Blocked: {} issue(s) at or above {} severity on production branch '{}'",
                issues_found,
                threshold.as_str(),
                verdict.target_branch
            )
        } else {
            format!(
                "Passed: no issues at or above {} severity",
                threshold.as_str()
            )
        };

        Ok(QualityGateResult {
            passed: !blocked,
            blocked,
            reason,
            override_used: false,
            override_limit_exceeded,
            highest_severity: highest,
            issues_found,
            evaluation_time_ms: 0,
        })
    }
}

/// Recognized production branch/environment name, case-insensitive.
fn is_production_name(name: &str) -> bool {
    let lower = name.trim().to_ascii_lowercase();
    PRODUCTION_NAMES.contains(&lower.as_str())
}

/// Whole-word, case-insensitive keyword match in the commit message.
fn message_has_keyword(message: &str, keyword: &str) -> anyhow::Result<bool> {
    let pattern = format!(r"(?i)\b{}\b", regex::escape(keyword.trim()));
    let re = Regex::new(&pattern)?;
    Ok(re.is_match(message))
}
