//! Remediation orchestration
//!
//! Drains the event bus and takes each anomaly through workflow resolution,
//! the policy gate, credential lookup and the remediator, recording the
//! outcome. Events are handled independently: a failure is logged, audited
//! and counted, and the loop moves on to the next event. Only shutdown stops
//! the loop, including while a credential lookup is outstanding.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{CredentialProvider, Remediator};
use crate::bus::EventConsumer;
use crate::config::{PipelineConfig, DEFAULT_WORKFLOW};
use crate::error::{PipelineError, Result};
use crate::health::{Component, HealthRegistry};
use crate::models::{AnomalyEvent, PolicyDecision, RemediationResult};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::policy::PolicyGate;
use crate::store::{AuditEntry, AuditKind, AuditLog, ResultStore};

/// Terminal outcome of handling one event
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    Remediated(RemediationResult),
    Denied(PolicyDecision),
}

/// Counters for one run of the remediation loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemediationStats {
    pub handled: u64,
    pub remediated: u64,
    pub denied: u64,
    pub failed: u64,
}

pub struct RemediationOrchestrator {
    workflows: HashMap<String, String>,
    gate: PolicyGate,
    remediator: Remediator,
    credentials: Arc<dyn CredentialProvider>,
    results: ResultStore,
    audit: AuditLog,
    health: Option<HealthRegistry>,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl RemediationOrchestrator {
    pub fn new(
        workflows: HashMap<String, String>,
        gate: PolicyGate,
        remediator: Remediator,
        credentials: Arc<dyn CredentialProvider>,
        results: ResultStore,
        audit: AuditLog,
    ) -> Self {
        Self {
            workflows,
            gate,
            remediator,
            credentials,
            results,
            audit,
            health: None,
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new("remediation"),
        }
    }

    /// Build from validated configuration
    pub fn from_config(
        config: &PipelineConfig,
        credentials: Arc<dyn CredentialProvider>,
        results: ResultStore,
        audit: AuditLog,
    ) -> Self {
        Self::new(
            config.workflows.clone(),
            PolicyGate::new(config.policy_rules.clone()),
            Remediator::from_config(config),
            credentials,
            results,
            audit,
        )
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Report remediator health to a registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Workflow for a service category, `"default"` when unmapped
    pub fn resolve_workflow(&self, service: &str) -> &str {
        self.workflows
            .get(service)
            .map(String::as_str)
            .unwrap_or(DEFAULT_WORKFLOW)
    }

    /// Handle one event
    ///
    /// A policy denial is a normal outcome and returns `Ok(Denied)`. Credential
    /// failures and remediations that would raise cost return an error; both
    /// are audited before returning. Shutdown during the credential lookup
    /// returns `Cancelled` and leaves no audit entry.
    pub async fn handle(
        &self,
        event: &AnomalyEvent,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<HandleOutcome> {
        let workflow = self.resolve_workflow(&event.service).to_string();
        debug!(
            provider = %event.provider,
            service = %event.service,
            workflow = %workflow,
            "Starting remediation workflow"
        );

        let decision = self.gate.decide(event);
        if !decision.approved {
            self.audit.record(AuditEntry::for_event(
                event,
                &workflow,
                AuditKind::PolicyDenied,
                &decision.reason,
            ));
            self.metrics.inc_policy_denials();
            self.logger.log_policy_denied(
                event.provider.as_str(),
                &event.service,
                event.deviation_pct,
                &decision.reason,
            );
            self.report_success().await;
            return Ok(HandleOutcome::Denied(decision));
        }

        let result = match self.remediate(event, &workflow, shutdown).await {
            Ok(result) => result,
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                self.audit.record(AuditEntry::for_event(
                    event,
                    &workflow,
                    AuditKind::CredentialError,
                    e.to_string(),
                ));
                self.report_failure(&e).await;
                return Err(e);
            }
        };

        if result.after_cost > result.before_cost || result.savings < 0.0 {
            let reason = format!(
                "remediation would increase cost from {:.2} to {:.2}",
                result.before_cost, result.after_cost
            );
            self.audit.record(AuditEntry::for_event(
                event,
                &workflow,
                AuditKind::GuardRejected,
                &reason,
            ));
            let err = PipelineError::PolicyDenied(reason);
            self.report_failure(&err).await;
            return Err(err);
        }

        self.results.append(result.clone());
        self.metrics.record_remediation(result.savings);
        self.logger.log_remediation(
            result.provider.as_str(),
            &result.service,
            &result.workflow,
            result.before_cost,
            result.after_cost,
            result.savings,
        );
        self.report_success().await;

        Ok(HandleOutcome::Remediated(result))
    }

    async fn remediate(
        &self,
        event: &AnomalyEvent,
        workflow: &str,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<RemediationResult> {
        let credential = tokio::select! {
            // An issued credential wins over a shutdown that arrives with it
            biased;
            credential = self.credentials.credential(event.provider) => credential?,
            _ = shutdown.recv() => return Err(PipelineError::Cancelled),
        };
        self.remediator.apply(event, workflow, &credential)
    }

    async fn report_success(&self) {
        if let Some(health) = &self.health {
            health.record_success(Component::Remediator).await;
        }
    }

    async fn report_failure(&self, err: &PipelineError) {
        if let Some(health) = &self.health {
            health
                .record_failure(Component::Remediator, err.to_string())
                .await;
        }
    }

    /// Drain the bus until shutdown or until every publisher is gone
    pub async fn run(
        &self,
        mut consumer: EventConsumer,
        mut shutdown: broadcast::Receiver<()>,
    ) -> RemediationStats {
        info!("Starting remediation loop");
        let mut stats = RemediationStats::default();

        loop {
            let event = match consumer.consume(&mut shutdown).await {
                Ok(event) => event,
                Err(PipelineError::Cancelled) => {
                    info!("Shutting down remediation loop");
                    break;
                }
                Err(PipelineError::BusClosed) => {
                    info!("Event bus closed, stopping remediation loop");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Unexpected error consuming event");
                    continue;
                }
            };
            self.metrics.set_bus_pending(consumer.pending());

            stats.handled += 1;
            match self.handle(&event, &mut shutdown).await {
                Ok(HandleOutcome::Remediated(_)) => stats.remediated += 1,
                Ok(HandleOutcome::Denied(_)) => stats.denied += 1,
                Err(e) if e.is_terminal() => {
                    info!(
                        provider = %event.provider,
                        service = %event.service,
                        "Shutting down remediation loop mid-event"
                    );
                    break;
                }
                Err(e) => {
                    stats.failed += 1;
                    self.metrics.inc_remediation_failures();
                    self.logger.log_remediation_failed(
                        event.provider.as_str(),
                        &event.service,
                        &e.to_string(),
                    );
                }
            }
        }

        stats
    }
}
