//! Review pipeline orchestration
//!
//! Ties the five decision components together for one review run: consult
//! the availability monitor, size and chunk the changeset, drive the attempt
//! loop against the review invoker, and hand the final response to the
//! quality gate. Attempts within a run are strictly ordered; the only
//! suspension points are the invoker call (under a timeout budget) and the
//! backoff sleeps.

use crate::audit::{AuditContext, AuditSink};
use crate::config::EngineConfig;
use crate::fallback::{self, FallbackStrategy};
use crate::gate::{QualityGate, QualityGateResult, ReviewVerdict};
use crate::health::{AvailabilityMonitor, DegradationMode};
use crate::review::{FileDescriptor, ReviewResponse};
use crate::size::{self, CommitSizeAnalysis, ReviewChunk, SizeStrategy};
use crate::validate::{self, classify_error};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

/// The language-model review call, implemented by a collaborator. The engine
/// only sees a structured result (or raw model text as a JSON string) or an
/// error.
pub trait ReviewInvoker {
    fn invoke(
        &self,
        prompt: &str,
        files: &[FileDescriptor],
    ) -> impl Future<Output = anyhow::Result<Value>> + Send;
}

/// One changeset submitted for review.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub files: Vec<FileDescriptor>,
    pub commit_message: String,
    pub commit_author: String,
    pub target_branch: String,
}

/// Everything a caller needs to act on a finished run.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub run_id: Uuid,
    pub response: ReviewResponse,
    pub gate: QualityGateResult,
    pub mode: DegradationMode,
    pub analysis: CommitSizeAnalysis,
    pub chunks_reviewed: usize,
    pub attempts: u32,
    /// The changeset was not sent for review at all (offline/minimal mode,
    /// or a size skip).
    pub skipped: bool,
}

/// Default review instructions sent with each chunk.
fn review_prompt() -> String {
    "Review the following code changes. Report security, performance, \
     standards, formatting, and logic issues with severity HIGH, MEDIUM, or \
     LOW. Respond with a JSON object: {\"issues\": [{\"severity\": ..., \
     \"category\": ..., \"description\": ..., \"file\": ..., \"line\": ...}], \
     \"summary\": {}}."
        .to_string()
}

/// The resilience and decision engine for one deployment.
pub struct ReviewEngine<I, A> {
    config: EngineConfig,
    invoker: I,
    audit: A,
    monitor: AvailabilityMonitor,
    gate: QualityGate,
    environment: String,
}

impl<I: ReviewInvoker, A: AuditSink> ReviewEngine<I, A> {
    /// Build an engine. The one place that returns an error: an invalid
    /// config is a startup bug, not a runtime condition to degrade around.
    pub fn new(
        config: EngineConfig,
        invoker: I,
        audit: A,
        environment: impl Into<String>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let gate = QualityGate::new(config.gate.clone());
        Ok(Self {
            config,
            invoker,
            audit,
            monitor: AvailabilityMonitor::new(),
            gate,
            environment: environment.into(),
        })
    }

    pub fn monitor(&self) -> &AvailabilityMonitor {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut AvailabilityMonitor {
        &mut self.monitor
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    /// Run one review end to end. Never returns an error: every failure mode
    /// ends in a synthesized response and a gate decision.
    pub async fn run_review(&mut self, request: &ChangeRequest) -> ReviewOutcome {
        let run_id = Uuid::new_v4();
        let context = AuditContext {
            author: request.commit_author.clone(),
            branch: request.target_branch.clone(),
            environment: self.environment.clone(),
        };
        let mode = self.monitor.mode();
        let analysis = size::analyze(&request.files, &self.config.limits);
        self.audit.log_info(
            "review_run_started",
            &json!({
                "run_id": run_id.to_string(),
                "mode": mode.as_str(),
                "files": analysis.total_files,
            }),
            &context,
        );

        // Availability pre-empts everything else.
        if mode <= DegradationMode::Minimal {
            let response = AvailabilityMonitor::offline_response();
            let gate = self.evaluate_gate(&response, request);
            return ReviewOutcome {
                run_id,
                response,
                gate,
                mode,
                analysis,
                chunks_reviewed: 0,
                attempts: 0,
                skipped: true,
            };
        }

        // A skip-worthy changeset gets the manual-review synthesis; the
        // orchestration layer renders the analysis message externally.
        if analysis.strategy == SizeStrategy::Skip {
            let decision =
                fallback::execute(FallbackStrategy::Manual, 0, &self.config.retry, &request.files);
            let mut response = decision.response.unwrap_or_default();
            if let Some(message) = &analysis.message {
                response.summary.notes.push(message.clone());
            }
            let gate = self.evaluate_gate(&response, request);
            return ReviewOutcome {
                run_id,
                response,
                gate,
                mode,
                analysis,
                chunks_reviewed: 0,
                attempts: 0,
                skipped: true,
            };
        }

        let chunks = if analysis.strategy == SizeStrategy::Split {
            size::split_into_chunks(&request.files, &self.config.limits)
        } else {
            vec![ReviewChunk {
                total_size: request.files.iter().map(|f| f.size_bytes).sum(),
                estimated_tokens: request.files.iter().map(|f| f.estimated_tokens).sum(),
                file_count: request.files.len(),
                files: request.files.clone(),
            }]
        };

        let timeout_budget =
            Duration::from_millis(AvailabilityMonitor::mode_config(mode).timeout_ms);
        let mut merged = ReviewResponse::default();
        let mut total_attempts = 0u32;
        let chunk_count = chunks.len();

        for chunk in &chunks {
            let (response, attempts) = self.review_chunk(chunk, timeout_budget, &context).await;
            total_attempts += attempts;
            merge_into(&mut merged, response);
        }
        merged.recount();

        let response = if mode == DegradationMode::Partial {
            self.monitor.merge_partial(Some(merged))
        } else {
            merged
        };

        let gate = self.evaluate_gate(&response, request);
        self.audit.log_info(
            "review_run_finished",
            &json!({
                "run_id": run_id.to_string(),
                "issues": response.summary.total_issues,
                "blocked": gate.blocked,
                "attempts": total_attempts,
            }),
            &context,
        );

        ReviewOutcome {
            run_id,
            response,
            gate,
            mode,
            analysis,
            chunks_reviewed: chunk_count,
            attempts: total_attempts,
            skipped: false,
        }
    }

    /// The attempt loop for one chunk. Always terminates with a response:
    /// either a parsed model result or a fallback synthesis.
    async fn review_chunk(
        &self,
        chunk: &ReviewChunk,
        timeout_budget: Duration,
        context: &AuditContext,
    ) -> (ReviewResponse, u32) {
        let max_attempts = self.config.retry.max_retries;
        let mut prompt = review_prompt();

        for attempt in 1..=max_attempts {
            let call = self.invoker.invoke(&prompt, &chunk.files);
            let error = match tokio::time::timeout(timeout_budget, call).await {
                Err(_) => anyhow::anyhow!(
                    "review call timed out after {} ms",
                    timeout_budget.as_millis()
                ),
                Ok(Err(err)) => err,
                Ok(Ok(value)) => match self.accept_response(value) {
                    Ok(response) => return (response, attempt),
                    Err(err) => err,
                },
            };

            let class = classify_error(&error);
            let strategy = fallback::decide(class, attempt, max_attempts);
            self.audit.log_error(
                "review_attempt_failed",
                &format!(
                    "attempt {attempt}/{max_attempts} ({}): {error}; strategy {}",
                    class.as_str(),
                    strategy.as_str()
                ),
                context,
            );
            let decision = fallback::execute(strategy, attempt, &self.config.retry, &chunk.files);

            if decision.should_retry {
                if let Some(simplified) = decision.prompt {
                    prompt = simplified;
                }
                if let Some(delay_ms) = decision.delay_ms {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                continue;
            }

            let response = decision
                .response
                .unwrap_or_else(|| terminal_manual_response(&self.config, &chunk.files));
            return (response, attempt);
        }

        // Budget exhausted with the last strategy still asking to retry.
        (
            terminal_manual_response(&self.config, &chunk.files),
            max_attempts,
        )
    }

    /// Validate (and if needed repair) a raw invoker result into a response.
    fn accept_response(&self, value: Value) -> anyhow::Result<ReviewResponse> {
        // Raw model text arrives as a JSON string; sanitize it first.
        let value = match value {
            Value::String(text) => validate::parse_model_text(&text)
                .ok_or_else(|| anyhow::anyhow!("malformed response: no JSON object in output"))?,
            other => other,
        };

        let validation = validate::validate_response(&value);
        if !validation.is_valid {
            anyhow::bail!("malformed response: {}", validation.errors.join("; "));
        }

        let value = if validation.fallback_needed {
            validate::fix_response(&value)
                .ok_or_else(|| anyhow::anyhow!("malformed response: repair failed"))?
        } else {
            value
        };

        let mut response: ReviewResponse = serde_json::from_value(value)
            .map_err(|err| anyhow::anyhow!("malformed response: {err}"))?;
        response.recount();
        Ok(response)
    }

    fn evaluate_gate(&mut self, response: &ReviewResponse, request: &ChangeRequest) -> QualityGateResult {
        let verdict = ReviewVerdict {
            severity_breakdown: response.breakdown(),
            commit_message: request.commit_message.clone(),
            commit_author: request.commit_author.clone(),
            target_branch: request.target_branch.clone(),
        };
        self.gate.evaluate(&verdict, &self.environment, &self.audit)
    }
}

fn terminal_manual_response(config: &EngineConfig, files: &[FileDescriptor]) -> ReviewResponse {
    fallback::execute(FallbackStrategy::Manual, 0, &config.retry, files)
        .response
        .unwrap_or_default()
}

fn merge_into(merged: &mut ReviewResponse, part: ReviewResponse) {
    merged.issues.extend(part.issues);
    merged.summary.offline_mode |= part.summary.offline_mode;
    merged.summary.degraded_mode |= part.summary.degraded_mode;
    merged.summary.fallback_mode |= part.summary.fallback_mode;
    merged.summary.notes.extend(part.summary.notes);
}
