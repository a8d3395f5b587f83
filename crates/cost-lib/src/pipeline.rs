//! Pipeline assembly
//!
//! Wires the stores, the event bus, the collection loop and the remediation
//! orchestrator from one validated [`PipelineConfig`], and runs the two
//! tasks until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::anomaly::{AnomalyDetector, NotificationSink};
use crate::bus::{EventBus, EventConsumer};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::health::{Component, HealthRegistry};
use crate::models::SavingsSummary;
use crate::observability::StructuredLogger;
use crate::remediation::{
    CredentialProvider, HandleOutcome, RemediationOrchestrator, RemediationStats,
    StaticCredentialProvider,
};
use crate::source::{CollectionLoop, CollectionLoopBuilder, CollectionStats, CycleResults, MetricSource};
use crate::store::{AuditLog, MetricStore, ResultStore};

/// Shared read handles onto the pipeline's stores
#[derive(Debug, Clone)]
pub struct PipelineHandles {
    pub observations: MetricStore,
    pub results: ResultStore,
    pub audit: AuditLog,
    pub health: HealthRegistry,
}

/// What a finished run did
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub collection: CollectionStats,
    pub remediation: RemediationStats,
    pub summary: SavingsSummary,
}

/// Outcome of one deterministic collection step and the remediation it caused
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub cycle: CycleResults,
    pub outcomes: Vec<HandleOutcome>,
    pub failures: Vec<PipelineError>,
}

pub struct Pipeline {
    collection: CollectionLoop,
    orchestrator: RemediationOrchestrator,
    consumer: EventConsumer,
    handles: PipelineHandles,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn handles(&self) -> &PipelineHandles {
        &self.handles
    }

    /// Collect once and handle every event the cycle published
    ///
    /// Runs both halves on the caller's task, which makes the end-to-end flow
    /// deterministic for tests and one-shot runs. Events are handled while the
    /// cycle is still publishing, so a bounded bus smaller than the cycle's
    /// anomaly count cannot stall it.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let Pipeline {
            collection,
            orchestrator,
            consumer,
            ..
        } = self;
        let (shutdown_tx, mut collect_shutdown) = broadcast::channel(1);
        let mut handle_shutdown = shutdown_tx.subscribe();

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();

        let collect = collection.collect_once(&mut collect_shutdown);
        tokio::pin!(collect);
        let cycle = loop {
            let event = tokio::select! {
                biased;
                cycle = &mut collect => break cycle?,
                event = consumer.consume(&mut handle_shutdown) => event?,
            };
            record_outcome(
                orchestrator.handle(&event, &mut handle_shutdown).await,
                &mut outcomes,
                &mut failures,
            )?;
        };

        while let Some(event) = consumer.try_consume() {
            record_outcome(
                orchestrator.handle(&event, &mut handle_shutdown).await,
                &mut outcomes,
                &mut failures,
            )?;
        }
        Ok(TickReport {
            cycle,
            outcomes,
            failures,
        })
    }

    /// Run collection and remediation as two tasks until shutdown
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> PipelineReport {
        let Pipeline {
            collection,
            orchestrator,
            consumer,
            handles,
        } = self;

        handles.health.set_running(true).await;

        let collector = tokio::spawn(collection.run(shutdown.subscribe()));
        let remediation_shutdown = shutdown.subscribe();
        let remediator =
            tokio::spawn(async move { orchestrator.run(consumer, remediation_shutdown).await });

        let collection = match collector.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Collection task failed");
                handles
                    .health
                    .set_unhealthy(Component::Collector, e.to_string())
                    .await;
                CollectionStats::default()
            }
        };
        let remediation = match remediator.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Remediation task failed");
                handles
                    .health
                    .set_unhealthy(Component::Remediator, e.to_string())
                    .await;
                RemediationStats::default()
            }
        };
        handles.health.set_running(false).await;

        let summary = handles.results.summary();
        info!(
            cycles = collection.cycles,
            observations = handles.observations.total_recorded(),
            anomalies = collection.anomalies,
            remediated = remediation.remediated,
            denied = remediation.denied,
            failed = remediation.failed,
            total_savings = summary.total_savings,
            "Pipeline stopped"
        );

        PipelineReport {
            collection,
            remediation,
            summary,
        }
    }
}

/// Per-event failures are collected; anything else aborts the tick
fn record_outcome(
    handled: Result<HandleOutcome>,
    outcomes: &mut Vec<HandleOutcome>,
    failures: &mut Vec<PipelineError>,
) -> Result<()> {
    match handled {
        Ok(outcome) => outcomes.push(outcome),
        Err(e) if e.is_per_event() => failures.push(e),
        Err(e) => return Err(e),
    }
    Ok(())
}

/// Builder for a [`Pipeline`]
pub struct PipelineBuilder {
    config: PipelineConfig,
    source: Option<Arc<dyn MetricSource>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    health: Option<HealthRegistry>,
    instance: String,
    interval: Duration,
    jitter: Duration,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            source: None,
            credentials: None,
            notifier: None,
            health: None,
            instance: "cost-pipeline".to_string(),
            interval: Duration::from_secs(10),
            jitter: Duration::from_secs(1),
        }
    }

    pub fn source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Defaults to static credentials for every provider
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Validate the configuration and assemble every component
    ///
    /// Nothing is started here; a configuration error is returned before any
    /// task could observe a partially built pipeline.
    pub async fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        let source = self
            .source
            .ok_or_else(|| PipelineError::config("metric source is required"))?;

        let detector = AnomalyDetector::from_config(&self.config)?;
        let (publisher, consumer) = EventBus::with_capacity(self.config.bus_capacity)?;

        let health = self.health.unwrap_or_default();
        health.register_all().await;

        let handles = PipelineHandles {
            observations: MetricStore::with_retention(self.config.max_observations),
            results: ResultStore::new(),
            audit: AuditLog::with_retention(self.config.max_audit_entries),
            health,
        };
        let logger = StructuredLogger::new(&self.instance);

        let mut collection = CollectionLoopBuilder::new()
            .source(source)
            .store(handles.observations.clone())
            .detector(detector)
            .publisher(publisher)
            .health(handles.health.clone())
            .logger(logger.clone())
            .interval(self.interval)
            .jitter(self.jitter);
        if let Some(notifier) = self.notifier {
            collection = collection.notifier(notifier);
        }
        let collection = collection.build()?;

        let credentials = self.credentials.unwrap_or_else(|| {
            warn!("No credential provider configured, using static credentials");
            Arc::new(StaticCredentialProvider::all())
        });
        let orchestrator = RemediationOrchestrator::from_config(
            &self.config,
            credentials,
            handles.results.clone(),
            handles.audit.clone(),
        )
        .with_health(handles.health.clone())
        .with_logger(logger.clone());

        logger.log_startup(
            env!("CARGO_PKG_VERSION"),
            self.config.baselines.len(),
            self.config.policy_rules.len(),
        );
        Ok(Pipeline {
            collection,
            orchestrator,
            consumer,
            handles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CostObservation, Provider};
    use crate::source::StaticSource;
    use crate::store::AuditKind;
    use async_trait::async_trait;
    use tokio::time::timeout;

    fn config() -> PipelineConfig {
        PipelineConfig::without_baselines()
            .with_baseline(Provider::Aws, "compute", 100.0)
            .with_baseline(Provider::Azure, "storage", 200.0)
    }

    async fn pipeline(batches: Vec<Vec<CostObservation>>) -> Pipeline {
        Pipeline::builder(config())
            .source(Arc::new(StaticSource::new(batches)))
            .interval(Duration::from_millis(5))
            .jitter(Duration::ZERO)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_anomaly_is_remediated_end_to_end() {
        let mut pipeline = pipeline(vec![vec![CostObservation::new(
            Provider::Aws,
            "compute",
            135.0,
        )]])
        .await;

        let report = pipeline.tick().await.unwrap();

        assert_eq!(report.cycle.anomalies, 1);
        let HandleOutcome::Remediated(result) = &report.outcomes[0] else {
            panic!("expected remediation");
        };
        assert_eq!(result.workflow, "compute-optimization");
        assert!((result.after_cost - 108.0).abs() < 1e-9);
        assert!((result.savings - 27.0).abs() < 1e-9);

        let summary = pipeline.handles().results.summary();
        assert_eq!(summary.count, 1);
        assert!((summary.total_savings - 27.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_large_deviation_is_denied_end_to_end() {
        let mut pipeline = pipeline(vec![vec![CostObservation::new(
            Provider::Aws,
            "compute",
            250.0,
        )]])
        .await;

        let report = pipeline.tick().await.unwrap();

        assert!(matches!(report.outcomes[0], HandleOutcome::Denied(_)));
        assert!(pipeline.handles().results.is_empty());
        assert_eq!(pipeline.handles().audit.count(AuditKind::PolicyDenied), 1);
    }

    #[tokio::test]
    async fn test_within_threshold_produces_nothing() {
        let mut pipeline = pipeline(vec![vec![
            CostObservation::new(Provider::Aws, "compute", 120.0),
            CostObservation::new(Provider::Azure, "storage", 150.0),
        ]])
        .await;

        let report = pipeline.tick().await.unwrap();

        assert_eq!(report.cycle.recorded, 2);
        assert!(report.outcomes.is_empty());
        assert_eq!(pipeline.handles().observations.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_baselines_fail_before_start() {
        let result = Pipeline::builder(PipelineConfig::without_baselines())
            .source(Arc::new(StaticSource::new(vec![])))
            .build()
            .await;

        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let result = Pipeline::builder(config()).build().await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let pipeline = pipeline(vec![
            vec![CostObservation::new(Provider::Aws, "compute", 135.0)],
            vec![CostObservation::new(Provider::Azure, "storage", 260.0)],
        ])
        .await;
        let handles = pipeline.handles().clone();
        let (shutdown_tx, _) = broadcast::channel(1);

        let task = tokio::spawn(pipeline.run(shutdown_tx.clone()));
        while handles.results.len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown_tx.send(()).unwrap();

        let report = task.await.unwrap();
        assert_eq!(report.remediation.remediated, 2);
        assert_eq!(report.summary.count, 2);
        assert!(report.collection.anomalies >= 2);
        assert!(!handles.health.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_tick_with_bus_smaller_than_cycle() {
        let mut config = config();
        config.bus_capacity = Some(1);
        let mut pipeline = Pipeline::builder(config)
            .source(Arc::new(StaticSource::new(vec![vec![
                CostObservation::new(Provider::Aws, "compute", 135.0),
                CostObservation::new(Provider::Azure, "storage", 260.0),
            ]])))
            .build()
            .await
            .unwrap();

        let report = timeout(Duration::from_secs(2), pipeline.tick())
            .await
            .expect("tick stalled on a full bus")
            .unwrap();

        assert_eq!(report.cycle.anomalies, 2);
        assert_eq!(report.outcomes.len(), 2);
        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o, HandleOutcome::Remediated(_))));
        assert!(report.failures.is_empty());
        assert_eq!(pipeline.handles().results.len(), 2);
    }

    #[tokio::test]
    async fn test_tick_collects_credential_failures() {
        let mut pipeline = Pipeline::builder(config())
            .source(Arc::new(StaticSource::new(vec![vec![
                CostObservation::new(Provider::Aws, "compute", 135.0),
                CostObservation::new(Provider::Azure, "storage", 260.0),
            ]])))
            .credentials(Arc::new(StaticCredentialProvider::new([Provider::Aws])))
            .build()
            .await
            .unwrap();

        let report = pipeline.tick().await.unwrap();

        assert_eq!(report.outcomes.len(), 1);
        assert!(matches!(
            report.failures.as_slice(),
            [PipelineError::Credential { .. }]
        ));
    }

    struct StalledSource;

    #[async_trait]
    impl MetricSource for StalledSource {
        async fn poll(&self) -> Result<Vec<CostObservation>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_run_stops_while_source_is_stalled() {
        let pipeline = Pipeline::builder(config())
            .source(Arc::new(StalledSource))
            .interval(Duration::from_millis(5))
            .jitter(Duration::ZERO)
            .build()
            .await
            .unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);

        let task = tokio::spawn(pipeline.run(shutdown_tx.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        let report = timeout(Duration::from_secs(2), task)
            .await
            .expect("pipeline ignored shutdown")
            .unwrap();
        assert_eq!(report.collection.cycles, 0);
        assert_eq!(report.remediation.handled, 0);
    }
}
