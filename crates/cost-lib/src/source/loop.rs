//! Cost collection loop
//!
//! Periodically polls a metric source, records every observation, evaluates
//! it against its baseline and publishes anomalies to the event bus.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::MetricSource;
use crate::anomaly::{notify_detached, AnomalyDetector, NotificationSink};
use crate::bus::EventPublisher;
use crate::error::{PipelineError, Result};
use crate::health::{Component, HealthRegistry};
use crate::models::AnomalyEvent;
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::store::MetricStore;

/// Configuration for the collection loop
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Base collection interval (default: 10 seconds)
    pub interval: Duration,
    /// Maximum jitter to add to interval (default: 1 second)
    pub jitter: Duration,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            jitter: Duration::from_secs(1),
        }
    }
}

/// Results from a single collection cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleResults {
    pub recorded: usize,
    pub anomalies: usize,
    pub detection_errors: usize,
    pub source_failed: bool,
}

/// Totals across every cycle of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub cycles: u64,
    pub recorded: u64,
    pub anomalies: u64,
    pub source_errors: u64,
    pub detection_errors: u64,
}

impl CollectionStats {
    fn absorb(&mut self, cycle: &CycleResults) {
        self.cycles += 1;
        self.recorded += cycle.recorded as u64;
        self.anomalies += cycle.anomalies as u64;
        self.detection_errors += cycle.detection_errors as u64;
        if cycle.source_failed {
            self.source_errors += 1;
        }
    }
}

pub struct CollectionLoop {
    source: Arc<dyn MetricSource>,
    store: MetricStore,
    detector: AnomalyDetector,
    publisher: EventPublisher,
    notifier: Option<Arc<dyn NotificationSink>>,
    health: Option<HealthRegistry>,
    config: CollectionConfig,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl CollectionLoop {
    pub fn new(
        source: Arc<dyn MetricSource>,
        store: MetricStore,
        detector: AnomalyDetector,
        publisher: EventPublisher,
        config: CollectionConfig,
    ) -> Self {
        Self {
            source,
            store,
            detector,
            publisher,
            notifier: None,
            health: None,
            config,
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new("collector"),
        }
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Run cycles until shutdown fires or the bus closes
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> CollectionStats {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting cost collection loop"
        );
        let mut stats = CollectionStats::default();

        loop {
            match self.collect_once(&mut shutdown).await {
                Ok(cycle) => stats.absorb(&cycle),
                Err(PipelineError::Cancelled) => {
                    info!("Shutting down cost collection loop");
                    break;
                }
                Err(PipelineError::BusClosed) => {
                    warn!("Event bus closed, stopping cost collection loop");
                    break;
                }
                Err(e) => warn!(error = %e, "Collection cycle failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.next_delay()) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down cost collection loop");
                    break;
                }
            }
        }

        stats
    }

    /// Run a single cycle: poll, validate, record, evaluate, publish
    ///
    /// A failed poll, an observation with an invalid cost and an observation
    /// without a baseline are logged, counted and reported in the results.
    /// Only `Cancelled` (shutdown while polling or publishing) and `BusClosed`
    /// are returned as errors.
    pub async fn collect_once(&self, shutdown: &mut broadcast::Receiver<()>) -> Result<CycleResults> {
        let start = Instant::now();
        let mut results = CycleResults::default();

        let polled = tokio::select! {
            // A ready batch wins over a shutdown that arrives at the same time
            biased;
            polled = self.source.poll() => polled,
            _ = shutdown.recv() => return Err(PipelineError::Cancelled),
        };
        let observations = match polled {
            Ok(observations) => observations,
            Err(e) => {
                self.metrics.inc_source_errors();
                warn!(error = %e, "Failed to poll metric source");
                if let Some(health) = &self.health {
                    health
                        .record_failure(Component::Collector, e.to_string())
                        .await;
                }
                results.source_failed = true;
                return Ok(results);
            }
        };

        let mut last_error = None;
        for obs in observations {
            if let Err(e) = obs.validate() {
                results.detection_errors += 1;
                self.metrics.inc_detection_errors();
                error!(
                    provider = %obs.provider,
                    service = %obs.service,
                    error = %e,
                    "Rejected observation"
                );
                last_error = Some(e);
                continue;
            }

            self.store.record(obs.clone());
            results.recorded += 1;

            match self.detector.evaluate(&obs) {
                Ok(Some(event)) => {
                    results.anomalies += 1;
                    self.metrics.inc_anomalies_detected();
                    self.logger.log_anomaly(
                        event.provider.as_str(),
                        &event.service,
                        event.observed_cost,
                        event.baseline_cost,
                        event.deviation_pct,
                    );
                    if let Some(sink) = &self.notifier {
                        notify_detached(sink.clone(), event.clone());
                    }
                    self.publish(event, shutdown).await?;
                }
                Ok(None) => {}
                Err(e) => {
                    results.detection_errors += 1;
                    self.metrics.inc_detection_errors();
                    error!(
                        provider = %obs.provider,
                        service = %obs.service,
                        error = %e,
                        "Failed to evaluate observation"
                    );
                    last_error = Some(e);
                }
            }
        }

        if let Some(health) = &self.health {
            match last_error {
                Some(e) => {
                    health.record_failure(Component::Collector, e.to_string()).await;
                }
                None => health.record_success(Component::Collector).await,
            }
            if !self.publisher.is_saturated() {
                health.record_success(Component::EventBus).await;
            }
        }

        let elapsed = start.elapsed();
        self.metrics.inc_observations_recorded(results.recorded as u64);
        self.metrics.observe_collection_latency(elapsed.as_secs_f64());
        debug!(
            recorded = results.recorded,
            anomalies = results.anomalies,
            "Observations evaluated"
        );
        self.logger
            .log_collection(results.recorded, results.anomalies, elapsed.as_millis());

        Ok(results)
    }

    /// Publish one event, reporting bus backpressure and closure to health
    async fn publish(
        &self,
        event: AnomalyEvent,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        if self.publisher.is_saturated() {
            warn!(
                pending = self.publisher.pending(),
                "Event bus full, waiting for remediation"
            );
            if let Some(health) = &self.health {
                health
                    .set_degraded(Component::EventBus, "event bus full, collection waiting")
                    .await;
            }
        }

        match self.publisher.publish(event, shutdown).await {
            Ok(()) => {
                self.metrics.set_bus_pending(self.publisher.pending());
                Ok(())
            }
            Err(PipelineError::BusClosed) => {
                if let Some(health) = &self.health {
                    health
                        .set_unhealthy(Component::EventBus, "remediation consumer is gone")
                        .await;
                }
                Err(PipelineError::BusClosed)
            }
            Err(e) => Err(e),
        }
    }

    /// Interval plus random jitter to spread polls across instances
    fn next_delay(&self) -> Duration {
        let jitter_ms = rand_jitter(self.config.jitter.as_millis() as u64);
        self.config.interval + Duration::from_millis(jitter_ms)
    }
}

/// Generate a random jitter value between 0 and max_ms
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..max_ms)
}

/// Builder for the collection loop
pub struct CollectionLoopBuilder {
    source: Option<Arc<dyn MetricSource>>,
    store: Option<MetricStore>,
    detector: Option<AnomalyDetector>,
    publisher: Option<EventPublisher>,
    notifier: Option<Arc<dyn NotificationSink>>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    config: CollectionConfig,
}

impl CollectionLoopBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            store: None,
            detector: None,
            publisher: None,
            notifier: None,
            health: None,
            logger: None,
            config: CollectionConfig::default(),
        }
    }

    pub fn source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn store(mut self, store: MetricStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn detector(mut self, detector: AnomalyDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Send a notification for every detected anomaly
    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Report collector health to a registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn build(self) -> Result<CollectionLoop> {
        let source = self
            .source
            .ok_or_else(|| PipelineError::config("metric source is required"))?;
        let detector = self
            .detector
            .ok_or_else(|| PipelineError::config("anomaly detector is required"))?;
        let publisher = self
            .publisher
            .ok_or_else(|| PipelineError::config("event publisher is required"))?;
        if self.config.interval.is_zero() {
            return Err(PipelineError::config("collection interval must be positive"));
        }

        let mut collection_loop = CollectionLoop::new(
            source,
            self.store.unwrap_or_default(),
            detector,
            publisher,
            self.config,
        );
        collection_loop.notifier = self.notifier;
        collection_loop.health = self.health;
        if let Some(logger) = self.logger {
            collection_loop.logger = logger;
        }
        Ok(collection_loop)
    }
}

impl Default for CollectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::BaselineTable;
    use crate::bus::{EventBus, EventConsumer};
    use crate::config::BaselineConfig;
    use crate::health::ComponentStatus;
    use crate::models::{AnomalyEvent, CostObservation, Provider};
    use crate::source::StaticSource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn detector() -> AnomalyDetector {
        let baselines = BaselineTable::from_entries(&[
            BaselineConfig::new(Provider::Aws, "compute", 100.0),
            BaselineConfig::new(Provider::Azure, "storage", 200.0),
        ])
        .unwrap();
        AnomalyDetector::new(baselines, 20.0)
    }

    fn build_loop(
        source: Arc<dyn MetricSource>,
        health: Option<HealthRegistry>,
    ) -> (CollectionLoop, MetricStore, EventConsumer) {
        let store = MetricStore::new();
        let (publisher, consumer) = EventBus::unbounded();
        let mut builder = CollectionLoopBuilder::new()
            .source(source)
            .store(store.clone())
            .detector(detector())
            .publisher(publisher)
            .interval(Duration::from_millis(10))
            .jitter(Duration::ZERO);
        if let Some(health) = health {
            builder = builder.health(health);
        }
        (builder.build().unwrap(), store, consumer)
    }

    /// Fails every poll
    struct BrokenSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetricSource for BrokenSource {
        async fn poll(&self) -> Result<Vec<CostObservation>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::SourceUnavailable("connection refused".to_string()))
        }
    }

    /// Never answers a poll
    struct StalledSource;

    #[async_trait]
    impl MetricSource for StalledSource {
        async fn poll(&self) -> Result<Vec<CostObservation>> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<AnomalyEvent>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, event: &AnomalyEvent) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn test_collection_config_default() {
        let config = CollectionConfig::default();
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.jitter, Duration::from_secs(1));
    }

    #[test]
    fn test_rand_jitter() {
        for _ in 0..100 {
            assert!(rand_jitter(1000) < 1000);
        }
        assert_eq!(rand_jitter(0), 0);
    }

    #[test]
    fn test_builder_missing_source() {
        let (publisher, _consumer) = EventBus::unbounded();
        let result = CollectionLoopBuilder::new()
            .detector(detector())
            .publisher(publisher)
            .build();

        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let (publisher, _consumer) = EventBus::unbounded();
        let result = CollectionLoopBuilder::new()
            .source(Arc::new(StaticSource::new(vec![])))
            .detector(detector())
            .publisher(publisher)
            .interval(Duration::ZERO)
            .build();

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_collect_once_records_and_publishes() {
        let source = StaticSource::new(vec![vec![
            CostObservation::new(Provider::Aws, "compute", 135.0),
            CostObservation::new(Provider::Azure, "storage", 210.0),
            CostObservation::new(Provider::Aws, "compute", 120.0),
        ]]);
        let (collection_loop, store, mut consumer) = build_loop(Arc::new(source), None);
        let (_tx, mut shutdown) = broadcast::channel(1);

        let results = collection_loop.collect_once(&mut shutdown).await.unwrap();

        assert_eq!(results.recorded, 3);
        assert_eq!(results.anomalies, 1);
        assert_eq!(store.len(), 3);
        let event = consumer.try_consume().unwrap();
        assert_eq!(event.provider, Provider::Aws);
        assert!((event.deviation_pct - 35.0).abs() < 1e-9);
        assert!(consumer.try_consume().is_none());
    }

    #[tokio::test]
    async fn test_missing_baseline_is_recorded_and_degrades_health() {
        let health = HealthRegistry::new();
        health.register_all().await;
        let source = StaticSource::new(vec![vec![
            CostObservation::new(Provider::Gcp, "compute", 999.0),
            CostObservation::new(Provider::Aws, "compute", 150.0),
        ]]);
        let (collection_loop, store, mut consumer) =
            build_loop(Arc::new(source), Some(health.clone()));
        let (_tx, mut shutdown) = broadcast::channel(1);

        let results = collection_loop.collect_once(&mut shutdown).await.unwrap();

        assert_eq!(results.detection_errors, 1);
        assert_eq!(results.anomalies, 1);
        assert_eq!(store.len(), 2);
        assert!(consumer.try_consume().is_some());

        let report = health.health().await;
        assert_eq!(
            report.components[&Component::Collector].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_invalid_costs_are_rejected_before_recording() {
        let health = HealthRegistry::new();
        health.register_all().await;
        let source = StaticSource::new(vec![vec![
            CostObservation::new(Provider::Aws, "compute", -50.0),
            CostObservation::new(Provider::Aws, "compute", f64::NAN),
            CostObservation::new(Provider::Aws, "compute", f64::INFINITY),
            CostObservation::new(Provider::Aws, "compute", 135.0),
        ]]);
        let (collection_loop, store, mut consumer) =
            build_loop(Arc::new(source), Some(health.clone()));
        let (_tx, mut shutdown) = broadcast::channel(1);

        let results = collection_loop.collect_once(&mut shutdown).await.unwrap();

        assert_eq!(results.detection_errors, 3);
        assert_eq!(results.recorded, 1);
        assert_eq!(results.anomalies, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.latest(Provider::Aws, "compute").unwrap().cost, 135.0);
        assert_eq!(consumer.try_consume().unwrap().observed_cost, 135.0);
        assert!(consumer.try_consume().is_none());

        let collector = health.component(Component::Collector).await.unwrap();
        assert_eq!(collector.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_stalled_poll() {
        let (collection_loop, _store, _consumer) = build_loop(Arc::new(StalledSource), None);
        let (shutdown_tx, mut shutdown) = broadcast::channel(1);

        shutdown_tx.send(()).unwrap();
        let result = collection_loop.collect_once(&mut shutdown).await;
        assert_eq!(result, Err(PipelineError::Cancelled));

        let (collection_loop, _store, _consumer) = build_loop(Arc::new(StalledSource), None);
        let (shutdown_tx, shutdown) = broadcast::channel(1);
        let handle = tokio::spawn(collection_loop.run(shutdown));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(()).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("collection loop should stop on shutdown")
            .unwrap();
        assert_eq!(stats.cycles, 0);
    }

    #[tokio::test]
    async fn test_bus_backpressure_degrades_and_recovers() {
        let health = HealthRegistry::new();
        health.register_all().await;
        let (publisher, mut consumer) = EventBus::bounded(1).unwrap();
        let collection_loop = Arc::new(
            CollectionLoopBuilder::new()
                .source(Arc::new(StaticSource::new(vec![
                    vec![CostObservation::new(Provider::Aws, "compute", 135.0)],
                    vec![CostObservation::new(Provider::Aws, "compute", 140.0)],
                    vec![CostObservation::new(Provider::Aws, "compute", 110.0)],
                ])))
                .detector(detector())
                .publisher(publisher)
                .health(health.clone())
                .build()
                .unwrap(),
        );
        let (shutdown_tx, mut shutdown) = broadcast::channel(1);

        collection_loop.collect_once(&mut shutdown).await.unwrap();

        // The second cycle waits for space on the full bus
        let waiting = {
            let collection_loop = collection_loop.clone();
            let mut shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move { collection_loop.collect_once(&mut shutdown).await })
        };
        for _ in 0..100 {
            let bus = health.component(Component::EventBus).await.unwrap();
            if bus.status == ComponentStatus::Degraded {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            health.component(Component::EventBus).await.unwrap().status,
            ComponentStatus::Degraded
        );

        assert_eq!(consumer.try_consume().unwrap().observed_cost, 135.0);
        let cycle = waiting.await.unwrap().unwrap();
        assert_eq!(cycle.anomalies, 1);
        assert_eq!(consumer.try_consume().unwrap().observed_cost, 140.0);

        collection_loop.collect_once(&mut shutdown).await.unwrap();
        assert_eq!(
            health.component(Component::EventBus).await.unwrap().status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_source_failure_is_reported_not_returned() {
        let source = Arc::new(BrokenSource {
            calls: AtomicUsize::new(0),
        });
        let (collection_loop, store, _consumer) = build_loop(source.clone(), None);
        let (_tx, mut shutdown) = broadcast::channel(1);

        let results = collection_loop.collect_once(&mut shutdown).await.unwrap();

        assert!(results.source_failed);
        assert_eq!(results.recorded, 0);
        assert!(store.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_bus_is_returned() {
        let health = HealthRegistry::new();
        health.register_all().await;
        let source = StaticSource::new(vec![vec![CostObservation::new(
            Provider::Aws,
            "compute",
            500.0,
        )]]);
        let (collection_loop, _store, consumer) =
            build_loop(Arc::new(source), Some(health.clone()));
        drop(consumer);
        let (_tx, mut shutdown) = broadcast::channel(1);

        let result = collection_loop.collect_once(&mut shutdown).await;
        assert_eq!(result, Err(PipelineError::BusClosed));
        assert_eq!(
            health.component(Component::EventBus).await.unwrap().status,
            ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_notifier_receives_anomalies() {
        let sink = Arc::new(RecordingSink::default());
        let (publisher, _consumer) = EventBus::unbounded();
        let collection_loop = CollectionLoopBuilder::new()
            .source(Arc::new(StaticSource::new(vec![vec![CostObservation::new(
                Provider::Aws,
                "compute",
                300.0,
            )]])))
            .detector(detector())
            .publisher(publisher)
            .notifier(sink.clone())
            .build()
            .unwrap();
        let (_tx, mut shutdown) = broadcast::channel(1);

        collection_loop.collect_once(&mut shutdown).await.unwrap();

        for _ in 0..50 {
            if !sink.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_keeps_going_after_source_errors() {
        let source = Arc::new(BrokenSource {
            calls: AtomicUsize::new(0),
        });
        let (collection_loop, _store, _consumer) = build_loop(source.clone(), None);
        let (shutdown_tx, shutdown) = broadcast::channel(1);

        let handle = tokio::spawn(collection_loop.run(shutdown));
        while source.calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown_tx.send(()).unwrap();

        let stats = handle.await.unwrap();
        assert!(stats.cycles >= 3);
        assert_eq!(stats.source_errors, stats.cycles);
        assert_eq!(stats.recorded, 0);
    }
}
