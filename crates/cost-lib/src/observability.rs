//! Observability infrastructure for the cost pipeline
//!
//! Provides:
//! - Prometheus metrics (collection latency, anomalies, remediations, savings, bus depth)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct PipelineMetricsInner {
    collection_latency_seconds: Histogram,
    observations_recorded: IntCounter,
    anomalies_detected: IntCounter,
    remediations_applied: IntCounter,
    policy_denials: IntCounter,
    remediation_failures: IntCounter,
    source_errors: IntCounter,
    detection_errors: IntCounter,
    bus_pending_events: IntGauge,
    total_savings: Gauge,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            collection_latency_seconds: register_histogram!(
                "cost_pipeline_collection_latency_seconds",
                "Time spent polling the metric source and evaluating observations",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            observations_recorded: register_int_counter!(
                "cost_pipeline_observations_recorded_total",
                "Total number of cost observations recorded"
            )
            .expect("Failed to register observations_recorded"),

            anomalies_detected: register_int_counter!(
                "cost_pipeline_anomalies_detected_total",
                "Total number of cost anomalies detected"
            )
            .expect("Failed to register anomalies_detected"),

            remediations_applied: register_int_counter!(
                "cost_pipeline_remediations_applied_total",
                "Total number of remediations applied"
            )
            .expect("Failed to register remediations_applied"),

            policy_denials: register_int_counter!(
                "cost_pipeline_policy_denials_total",
                "Total number of anomalies denied by the policy gate"
            )
            .expect("Failed to register policy_denials"),

            remediation_failures: register_int_counter!(
                "cost_pipeline_remediation_failures_total",
                "Total number of anomalies whose remediation failed"
            )
            .expect("Failed to register remediation_failures"),

            source_errors: register_int_counter!(
                "cost_pipeline_source_errors_total",
                "Total number of failed metric source polls"
            )
            .expect("Failed to register source_errors"),

            detection_errors: register_int_counter!(
                "cost_pipeline_detection_errors_total",
                "Total number of observations that could not be evaluated"
            )
            .expect("Failed to register detection_errors"),

            bus_pending_events: register_int_gauge!(
                "cost_pipeline_bus_pending_events",
                "Anomaly events published but not yet consumed"
            )
            .expect("Failed to register bus_pending_events"),

            total_savings: register_gauge!(
                "cost_pipeline_total_savings",
                "Sum of savings across all applied remediations"
            )
            .expect("Failed to register total_savings"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.inner().collection_latency_seconds.observe(duration_secs);
    }

    pub fn inc_observations_recorded(&self, count: u64) {
        self.inner().observations_recorded.inc_by(count);
    }

    pub fn inc_anomalies_detected(&self) {
        self.inner().anomalies_detected.inc();
    }

    /// Count an applied remediation and add its savings
    pub fn record_remediation(&self, savings: f64) {
        self.inner().remediations_applied.inc();
        self.inner().total_savings.add(savings);
    }

    pub fn inc_policy_denials(&self) {
        self.inner().policy_denials.inc();
    }

    pub fn inc_remediation_failures(&self) {
        self.inner().remediation_failures.inc();
    }

    pub fn inc_source_errors(&self) {
        self.inner().source_errors.inc();
    }

    pub fn inc_detection_errors(&self) {
        self.inner().detection_errors.inc();
    }

    pub fn set_bus_pending(&self, pending: usize) {
        self.inner().bus_pending_events.set(pending as i64);
    }
}

/// Structured logger for pipeline events
///
/// Provides consistent JSON-formatted logging for anomalies, remediations,
/// policy decisions and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a completed collection cycle
    pub fn log_collection(&self, recorded: usize, anomalies: usize, elapsed_ms: u128) {
        info!(
            event = "collection_cycle",
            instance = %self.instance,
            recorded = recorded,
            anomalies = anomalies,
            elapsed_ms = elapsed_ms as u64,
            "Collection cycle complete"
        );
    }

    /// Log an anomaly detection event
    pub fn log_anomaly(
        &self,
        provider: &str,
        service: &str,
        observed_cost: f64,
        baseline_cost: f64,
        deviation_pct: f64,
    ) {
        warn!(
            event = "anomaly_detected",
            instance = %self.instance,
            provider = %provider,
            service = %service,
            observed_cost = observed_cost,
            baseline_cost = baseline_cost,
            deviation_pct = deviation_pct,
            "Cost anomaly detected"
        );
    }

    /// Log an applied remediation
    pub fn log_remediation(
        &self,
        provider: &str,
        service: &str,
        workflow: &str,
        before_cost: f64,
        after_cost: f64,
        savings: f64,
    ) {
        info!(
            event = "remediation_applied",
            instance = %self.instance,
            provider = %provider,
            service = %service,
            workflow = %workflow,
            before_cost = before_cost,
            after_cost = after_cost,
            savings = savings,
            "Remediation applied"
        );
    }

    /// Log a policy denial
    pub fn log_policy_denied(&self, provider: &str, service: &str, deviation_pct: f64, reason: &str) {
        warn!(
            event = "policy_denied",
            instance = %self.instance,
            provider = %provider,
            service = %service,
            deviation_pct = deviation_pct,
            reason = %reason,
            "Remediation denied by policy"
        );
    }

    /// Log a failed remediation
    pub fn log_remediation_failed(&self, provider: &str, service: &str, error: &str) {
        error!(
            event = "remediation_failed",
            instance = %self.instance,
            provider = %provider,
            service = %service,
            error = %error,
            "Remediation failed"
        );
    }

    /// Log pipeline startup
    pub fn log_startup(&self, version: &str, baselines: usize, policy_rules: usize) {
        info!(
            event = "pipeline_started",
            instance = %self.instance,
            version = %version,
            baselines = baselines,
            policy_rules = policy_rules,
            "Cost pipeline started"
        );
    }

    /// Log pipeline shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "pipeline_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Cost pipeline shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_metrics_creation() {
        // The Prometheus registry is global; handles share one registration.
        let metrics = PipelineMetrics::new();
        let other = PipelineMetrics::new();

        metrics.observe_collection_latency(0.001);
        metrics.inc_observations_recorded(3);
        metrics.inc_anomalies_detected();
        metrics.record_remediation(27.0);
        other.inc_policy_denials();
        other.set_bus_pending(4);
    }

    #[test]
    fn test_metrics_are_gathered() {
        let metrics = PipelineMetrics::new();
        metrics.inc_source_errors();

        let names: Vec<String> = prometheus::gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"cost_pipeline_source_errors_total".to_string()));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-instance");
        assert_eq!(logger.instance, "test-instance");
    }
}
