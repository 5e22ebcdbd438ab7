//! Audit sink interface
//!
//! Fire-and-forget audit events consumed by collaborators. Every operation
//! has a safe no-op default so partial implementations stay valid, and a
//! sink failure can never fail the governed operation.

use serde_json::Value;

/// Who/where an audited operation ran for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditContext {
    pub author: String,
    pub branch: String,
    pub environment: String,
}

/// Audit event sink. All methods default to no-ops.
pub trait AuditSink {
    fn log_info(&self, _event: &str, _data: &Value, _context: &AuditContext) {}

    fn log_error(&self, _event: &str, _message: &str, _context: &AuditContext) {}

    fn log_quality_gate_start(&self, _context: &AuditContext) {}

    fn log_quality_gate_decision(&self, _reason: &str, _blocked: bool, _context: &AuditContext) {}

    fn log_override_attempt(
        &self,
        _keyword: &str,
        _allowed: bool,
        _remaining: u32,
        _context: &AuditContext,
    ) {
    }
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {}

/// Sink that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn log_info(&self, event: &str, data: &Value, context: &AuditContext) {
        tracing::info!(event, %data, author = %context.author, branch = %context.branch, "audit");
    }

    fn log_error(&self, event: &str, message: &str, context: &AuditContext) {
        tracing::error!(event, message, author = %context.author, branch = %context.branch, "audit");
    }

    fn log_quality_gate_start(&self, context: &AuditContext) {
        tracing::info!(
            author = %context.author,
            branch = %context.branch,
            environment = %context.environment,
            "quality gate evaluation started"
        );
    }

    fn log_quality_gate_decision(&self, reason: &str, blocked: bool, context: &AuditContext) {
        tracing::info!(
            reason,
            blocked,
            author = %context.author,
            branch = %context.branch,
            "quality gate decision"
        );
    }

    fn log_override_attempt(
        &self,
        keyword: &str,
        allowed: bool,
        remaining: u32,
        context: &AuditContext,
    ) {
        tracing::warn!(
            keyword,
            allowed,
            remaining,
            author = %context.author,
            branch = %context.branch,
            "quality gate override attempt"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_noop_sink_accepts_everything() {
        let sink = NoopAudit;
        let context = AuditContext::default();
        sink.log_info("event", &json!({"k": 1}), &context);
        sink.log_error("event", "boom", &context);
        sink.log_quality_gate_start(&context);
        sink.log_quality_gate_decision("ok", false, &context);
        sink.log_override_attempt("URGENT", true, 2, &context);
    }

    #[test]
    fn test_partial_implementations_keep_defaults() {
        struct DecisionsOnly(std::cell::Cell<u32>);
        impl AuditSink for DecisionsOnly {
            fn log_quality_gate_decision(&self, _: &str, _: bool, _: &AuditContext) {
                self.0.set(self.0.get() + 1);
            }
        }
        let sink = DecisionsOnly(std::cell::Cell::new(0));
        let context = AuditContext::default();
        sink.log_quality_gate_start(&context);
        sink.log_quality_gate_decision("ok", false, &context);
        assert_eq!(sink.0.get(), 1);
    }
}
