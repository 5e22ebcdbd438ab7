//! Service availability monitoring
//!
//! Tracks the health of dependent services and computes a degradation mode
//! that pre-empts or narrows the rest of the pipeline: offline and minimal
//! modes skip the review entirely, partial mode annotates whatever output
//! exists. Health state is process-lifetime and owned here; multi-instance
//! deployments must externalize it.

use crate::review::{Category, ReviewIssue, ReviewResponse, Severity};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Services the review pipeline depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceName {
    LanguageModel,
    SourceHost,
    Email,
    Storage,
}

impl ServiceName {
    pub const ALL: [ServiceName; 4] = [
        ServiceName::LanguageModel,
        ServiceName::SourceHost,
        ServiceName::Email,
        ServiceName::Storage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::LanguageModel => "language-model",
            ServiceName::SourceHost => "source-host",
            ServiceName::Email => "email",
            ServiceName::Storage => "storage",
        }
    }

    /// The review pipeline cannot produce or post a review without these.
    pub fn is_critical(&self) -> bool {
        matches!(self, ServiceName::LanguageModel | ServiceName::SourceHost)
    }

    /// How the pipeline copes while this service is down.
    pub fn fallback(&self) -> ServiceFallback {
        match self {
            ServiceName::LanguageModel | ServiceName::SourceHost => ServiceFallback::Manual,
            ServiceName::Email => ServiceFallback::SourceHostIssue,
            ServiceName::Storage => ServiceFallback::Memory,
        }
    }
}

/// Coping strategy for an unavailable service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceFallback {
    Manual,
    SourceHostIssue,
    Memory,
}

impl ServiceFallback {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceFallback::Manual => "manual",
            ServiceFallback::SourceHostIssue => "source-host-issue",
            ServiceFallback::Memory => "memory",
        }
    }
}

/// Latest known health of one service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub available: bool,
    pub response_time_ms: Option<u64>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Operating tier, ordered `Full > Partial > Minimal > Offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMode {
    Offline,
    Minimal,
    Partial,
    Full,
}

impl DegradationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationMode::Offline => "offline",
            DegradationMode::Minimal => "minimal",
            DegradationMode::Partial => "partial",
            DegradationMode::Full => "full",
        }
    }
}

/// What each mode allows, consumed via [`AvailabilityMonitor::should_proceed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub ai_review: bool,
    pub email_notifications: bool,
    pub source_host_issues: bool,
    pub storage: bool,
    pub timeout_ms: u64,
}

/// Pipeline operations gated by the current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    AiReview,
    EmailNotifications,
    SourceHostIssues,
    Storage,
}

/// Mode plus per-service health, for dashboards and logs.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub mode: DegradationMode,
    pub services: Vec<(ServiceName, ServiceHealth)>,
}

/// Tracks service health and derives the degradation mode on demand.
#[derive(Debug, Default)]
pub struct AvailabilityMonitor {
    health: HashMap<ServiceName, ServiceHealth>,
}

impl AvailabilityMonitor {
    /// New monitor with every service unknown (treated as unavailable until
    /// the first probe).
    pub fn new() -> Self {
        let mut health = HashMap::new();
        for service in ServiceName::ALL {
            health.insert(service, ServiceHealth::default());
        }
        Self { health }
    }

    pub fn health(&self, service: ServiceName) -> &ServiceHealth {
        // All keys are seeded in new(); default covers a manually built map.
        static UNKNOWN: ServiceHealth = ServiceHealth {
            available: false,
            response_time_ms: None,
            last_checked_at: None,
            error: None,
        };
        self.health.get(&service).unwrap_or(&UNKNOWN)
    }

    /// Record a probe result directly. Useful for callers that run their own
    /// health checks on a schedule.
    pub fn record(&mut self, service: ServiceName, health: ServiceHealth) {
        self.health.insert(service, health);
    }

    /// Run one health probe and record the outcome.
    pub async fn check<F>(&mut self, service: ServiceName, probe: F)
    where
        F: std::future::Future<Output = anyhow::Result<bool>>,
    {
        let started = Instant::now();
        let outcome = probe.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let health = match outcome {
            Ok(available) => ServiceHealth {
                available,
                response_time_ms: Some(elapsed_ms),
                last_checked_at: Some(Utc::now()),
                error: None,
            },
            Err(err) => ServiceHealth {
                available: false,
                response_time_ms: Some(elapsed_ms),
                last_checked_at: Some(Utc::now()),
                error: Some(err.to_string()),
            },
        };
        tracing::debug!(
            service = service.as_str(),
            available = health.available,
            elapsed_ms,
            "health probe"
        );
        self.health.insert(service, health);
    }

    /// Run probes for several services concurrently. Probes write to
    /// disjoint services, so results are simply applied after the join.
    pub async fn check_all(
        &mut self,
        probes: Vec<(ServiceName, BoxFuture<'_, anyhow::Result<bool>>)>,
    ) {
        let timed = probes.into_iter().map(|(service, probe)| async move {
            let started = Instant::now();
            let outcome = probe.await;
            (service, started.elapsed().as_millis() as u64, outcome)
        });
        for (service, elapsed_ms, outcome) in futures::future::join_all(timed).await {
            let health = match outcome {
                Ok(available) => ServiceHealth {
                    available,
                    response_time_ms: Some(elapsed_ms),
                    last_checked_at: Some(Utc::now()),
                    error: None,
                },
                Err(err) => ServiceHealth {
                    available: false,
                    response_time_ms: Some(elapsed_ms),
                    last_checked_at: Some(Utc::now()),
                    error: Some(err.to_string()),
                },
            };
            self.health.insert(service, health);
        }
    }

    /// Reset all health state to unknown.
    pub fn reset(&mut self) {
        for service in ServiceName::ALL {
            self.health.insert(service, ServiceHealth::default());
        }
    }

    /// Current degradation mode from the latest health snapshot:
    /// both critical services up -> Full; one -> Partial; none but some
    /// non-critical service up -> Minimal; nothing up -> Offline.
    pub fn mode(&self) -> DegradationMode {
        let critical_up = ServiceName::ALL
            .iter()
            .filter(|s| s.is_critical() && self.health(**s).available)
            .count();
        match critical_up {
            2 => DegradationMode::Full,
            1 => DegradationMode::Partial,
            _ => {
                let any_up = ServiceName::ALL
                    .iter()
                    .any(|s| !s.is_critical() && self.health(*s).available);
                if any_up {
                    DegradationMode::Minimal
                } else {
                    DegradationMode::Offline
                }
            }
        }
    }

    /// Configuration bundle for a mode.
    pub fn mode_config(mode: DegradationMode) -> ModeConfig {
        match mode {
            DegradationMode::Full => ModeConfig {
                ai_review: true,
                email_notifications: true,
                source_host_issues: true,
                storage: true,
                timeout_ms: 30_000,
            },
            DegradationMode::Partial => ModeConfig {
                ai_review: true,
                email_notifications: false,
                source_host_issues: true,
                storage: true,
                timeout_ms: 45_000,
            },
            DegradationMode::Minimal => ModeConfig {
                ai_review: false,
                email_notifications: false,
                source_host_issues: false,
                storage: true,
                timeout_ms: 10_000,
            },
            DegradationMode::Offline => ModeConfig {
                ai_review: false,
                email_notifications: false,
                source_host_issues: false,
                storage: false,
                timeout_ms: 5_000,
            },
        }
    }

    /// Whether the current mode allows an operation.
    pub fn should_proceed(&self, operation: Operation) -> bool {
        let config = Self::mode_config(self.mode());
        match operation {
            Operation::AiReview => config.ai_review,
            Operation::EmailNotifications => config.email_notifications,
            Operation::SourceHostIssues => config.source_host_issues,
            Operation::Storage => config.storage,
        }
    }

    /// Canned result when no automated review can run at all.
    pub fn offline_response() -> ReviewResponse {
        let issue = ReviewIssue::new(
            Severity::Medium,
            Category::Standards,
            "Automated review is offline; manual review required before merge",
        )
        .with_recommendation(
            "Review the diff by hand, paying attention to security-sensitive \
             code paths, and re-run the automated review once services recover",
        );
        let mut response = ReviewResponse::from_issues(vec![issue]);
        response.summary.offline_mode = true;
        response
    }

    /// Annotate whatever review output exists with the degraded-operation
    /// notice and the per-service fallback strategies.
    pub fn merge_partial(&self, existing: Option<ReviewResponse>) -> ReviewResponse {
        let mut response = existing.unwrap_or_default();

        let mut available = Vec::new();
        let mut unavailable = Vec::new();
        for service in ServiceName::ALL {
            if self.health(service).available {
                available.push(service.as_str().to_string());
            } else {
                unavailable.push(format!(
                    "{} (fallback: {})",
                    service.as_str(),
                    service.fallback().as_str()
                ));
            }
        }

        response.issues.push(
            ReviewIssue::new(
                Severity::Low,
                Category::Standards,
                "Review ran under partial service availability; results may be incomplete",
            )
            .with_recommendation(format!(
                "Unavailable: {}",
                unavailable.join(", ")
            )),
        );
        response.summary.degraded_mode = true;
        response
            .summary
            .notes
            .push(format!("Available services: {}", available.join(", ")));
        response
            .summary
            .notes
            .push(format!("Unavailable services: {}", unavailable.join(", ")));
        response.recount();
        response
    }

    /// Snapshot for reporting.
    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            mode: self.mode(),
            services: ServiceName::ALL
                .iter()
                .map(|s| (*s, self.health(*s).clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn up() -> ServiceHealth {
        ServiceHealth {
            available: true,
            response_time_ms: Some(5),
            last_checked_at: Some(Utc::now()),
            error: None,
        }
    }

    fn monitor_with(up_services: &[ServiceName]) -> AvailabilityMonitor {
        let mut monitor = AvailabilityMonitor::new();
        for service in up_services {
            monitor.record(*service, up());
        }
        monitor
    }

    #[test]
    fn test_mode_is_monotone_in_critical_availability() {
        assert_eq!(
            monitor_with(&[ServiceName::LanguageModel, ServiceName::SourceHost]).mode(),
            DegradationMode::Full
        );
        assert_eq!(
            monitor_with(&[ServiceName::LanguageModel]).mode(),
            DegradationMode::Partial
        );
        assert_eq!(
            monitor_with(&[ServiceName::SourceHost]).mode(),
            DegradationMode::Partial
        );
        assert_eq!(
            monitor_with(&[ServiceName::Email]).mode(),
            DegradationMode::Minimal
        );
        assert_eq!(monitor_with(&[]).mode(), DegradationMode::Offline);
    }

    #[test]
    fn test_mode_ordering() {
        assert!(DegradationMode::Full > DegradationMode::Partial);
        assert!(DegradationMode::Partial > DegradationMode::Minimal);
        assert!(DegradationMode::Minimal > DegradationMode::Offline);
    }

    #[test]
    fn test_should_proceed_per_mode() {
        let full = monitor_with(&[ServiceName::LanguageModel, ServiceName::SourceHost]);
        assert!(full.should_proceed(Operation::AiReview));
        assert!(full.should_proceed(Operation::EmailNotifications));

        let partial = monitor_with(&[ServiceName::LanguageModel]);
        assert!(partial.should_proceed(Operation::AiReview));
        assert!(!partial.should_proceed(Operation::EmailNotifications));

        let offline = monitor_with(&[]);
        assert!(!offline.should_proceed(Operation::AiReview));
        assert!(!offline.should_proceed(Operation::Storage));
    }

    #[test]
    fn test_offline_response_shape() {
        let response = AvailabilityMonitor::offline_response();
        assert_eq!(response.issues.len(), 1);
        assert_eq!(response.issues[0].severity, Severity::Medium);
        assert!(response.summary.offline_mode);
        assert_eq!(response.summary.total_issues, 1);
    }

    #[test]
    fn test_merge_partial_annotates_existing_output() {
        let monitor = monitor_with(&[ServiceName::LanguageModel, ServiceName::Storage]);
        let existing = ReviewResponse::from_issues(vec![ReviewIssue::new(
            Severity::High,
            Category::Security,
            "sql injection",
        )]);
        let merged = monitor.merge_partial(Some(existing));
        assert_eq!(merged.issues.len(), 2);
        assert!(merged.summary.degraded_mode);
        assert!(merged
            .summary
            .notes
            .iter()
            .any(|n| n.contains("source-host (fallback: manual)")));
        assert!(merged
            .summary
            .notes
            .iter()
            .any(|n| n.contains("email (fallback: source-host-issue)")));
        assert_eq!(merged.summary.total_issues, 2);
    }

    #[tokio::test]
    async fn test_check_updates_health() {
        let mut monitor = AvailabilityMonitor::new();
        monitor
            .check(ServiceName::LanguageModel, async { Ok(true) })
            .await;
        let health = monitor.health(ServiceName::LanguageModel);
        assert!(health.available);
        assert!(health.last_checked_at.is_some());
        assert!(health.error.is_none());

        monitor
            .check(ServiceName::SourceHost, async {
                Err(anyhow::anyhow!("connection refused"))
            })
            .await;
        let health = monitor.health(ServiceName::SourceHost);
        assert!(!health.available);
        assert_eq!(health.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_check_all_probes_disjoint_services() {
        let mut monitor = AvailabilityMonitor::new();
        let probes: Vec<(ServiceName, BoxFuture<'_, anyhow::Result<bool>>)> = vec![
            (ServiceName::LanguageModel, Box::pin(async { Ok(true) })),
            (ServiceName::SourceHost, Box::pin(async { Ok(false) })),
            (
                ServiceName::Email,
                Box::pin(async { Err(anyhow::anyhow!("smtp down")) }),
            ),
        ];
        monitor.check_all(probes).await;
        assert!(monitor.health(ServiceName::LanguageModel).available);
        assert!(!monitor.health(ServiceName::SourceHost).available);
        assert_eq!(
            monitor.health(ServiceName::Email).error.as_deref(),
            Some("smtp down")
        );
        assert_eq!(monitor.mode(), DegradationMode::Partial);
    }
}
