//! Human-facing notification of anomalies
//!
//! Handles:
//! - Formatting anomalies as Alertmanager webhook alerts
//! - Deduplication of notifications within a configurable window
//! - Fire-and-forget delivery that never blocks the collection loop

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{AnomalyEvent, Provider};

/// Default deduplication window (15 minutes)
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 15 * 60;

/// Deviation at which an anomaly is reported as critical
const CRITICAL_DEVIATION_PCT: f64 = 50.0;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn for_event(event: &AnomalyEvent) -> Self {
        if event.deviation_pct >= CRITICAL_DEVIATION_PCT {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Alertmanager webhook alert format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// Alert status (firing or resolved)
    pub status: String,
    /// Alert labels for routing and grouping
    pub labels: HashMap<String, String>,
    /// Alert annotations with details
    pub annotations: HashMap<String, String>,
    /// Start time in RFC3339 format
    pub starts_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
}

/// Alertmanager webhook payload (array of alerts)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertmanagerPayload {
    pub alerts: Vec<AlertmanagerAlert>,
}

impl AlertmanagerAlert {
    /// Build a firing alert from an anomaly
    pub fn from_event(event: &AnomalyEvent) -> Self {
        let mut labels = HashMap::new();
        labels.insert("alertname".to_string(), "CloudCostAnomaly".to_string());
        labels.insert(
            "severity".to_string(),
            AlertSeverity::for_event(event).to_string(),
        );
        labels.insert("provider".to_string(), event.provider.as_str().to_string());
        labels.insert("service".to_string(), event.service.clone());
        for (key, value) in &event.tags {
            labels.insert(format!("tag_{}", key), value.clone());
        }

        let mut annotations = HashMap::new();
        annotations.insert(
            "summary".to_string(),
            format!("Cost anomaly for {} {}", event.provider, event.service),
        );
        annotations.insert(
            "description".to_string(),
            format!(
                "Observed cost ${:.2} is {:.1}% above baseline ${:.2} (threshold {:.1}%).",
                event.observed_cost, event.deviation_pct, event.baseline_cost, event.threshold_pct
            ),
        );
        annotations.insert(
            "deviation_pct".to_string(),
            format!("{:.2}", event.deviation_pct),
        );

        AlertmanagerAlert {
            status: "firing".to_string(),
            labels,
            annotations,
            starts_at: event.timestamp.to_rfc3339(),
            ends_at: None,
        }
    }
}

/// Receiver of anomaly notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &AnomalyEvent) -> anyhow::Result<()>;
}

/// Deliver a notification without waiting for it
///
/// Failures are logged and swallowed so alerting can never stall detection.
pub fn notify_detached(sink: Arc<dyn NotificationSink>, event: AnomalyEvent) {
    tokio::spawn(async move {
        if let Err(e) = sink.notify(&event).await {
            warn!(
                provider = %event.provider,
                service = %event.service,
                error = %e,
                "Failed to deliver anomaly notification"
            );
        }
    });
}

/// Key for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    provider: Provider,
    service: String,
}

impl DedupKey {
    fn for_event(event: &AnomalyEvent) -> Self {
        Self {
            provider: event.provider,
            service: event.service.clone(),
        }
    }
}

/// Sink that writes alerts to the log, suppressing repeats per service
pub struct LogSink {
    /// Deduplication window
    dedup_window: Duration,
    /// Recent notifications (key -> last emission time)
    recent: RwLock<HashMap<DedupKey, Instant>>,
}

impl LogSink {
    /// Create a sink with the default 15-minute deduplication window
    pub fn new() -> Self {
        Self {
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            recent: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Check whether a notification for this service was sent recently
    pub fn should_suppress(&self, event: &AnomalyEvent) -> bool {
        let recent = self.recent.read().unwrap_or_else(|e| e.into_inner());
        recent
            .get(&DedupKey::for_event(event))
            .map(|last| last.elapsed() < self.dedup_window)
            .unwrap_or(false)
    }

    fn record(&self, event: &AnomalyEvent) {
        let mut recent = self.recent.write().unwrap_or_else(|e| e.into_inner());
        recent.insert(DedupKey::for_event(event), Instant::now());
        recent.retain(|_, time| time.elapsed() < self.dedup_window);
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, event: &AnomalyEvent) -> anyhow::Result<()> {
        if self.should_suppress(event) {
            debug!(
                provider = %event.provider,
                service = %event.service,
                "Suppressing duplicate anomaly notification"
            );
            return Ok(());
        }

        let payload = AlertmanagerPayload {
            alerts: vec![AlertmanagerAlert::from_event(event)],
        };

        warn!(
            event = "anomaly_notification",
            provider = %event.provider,
            service = %event.service,
            severity = %AlertSeverity::for_event(event),
            observed_cost = event.observed_cost,
            deviation_pct = event.deviation_pct,
            "Cost anomaly detected"
        );
        debug!(payload = %serde_json::to_string(&payload)?, "Alertmanager payload");

        self.record(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(service: &str, deviation_pct: f64) -> AnomalyEvent {
        let mut tags = BTreeMap::new();
        tags.insert("team".to_string(), "team-a".to_string());
        AnomalyEvent {
            provider: Provider::Azure,
            service: service.to_string(),
            observed_cost: 100.0 * (1.0 + deviation_pct / 100.0),
            baseline_cost: 100.0,
            deviation_pct,
            threshold_pct: 20.0,
            timestamp: Utc::now(),
            tags,
        }
    }

    #[test]
    fn test_severity_from_deviation() {
        assert_eq!(AlertSeverity::for_event(&event("compute", 25.0)), AlertSeverity::Warning);
        assert_eq!(AlertSeverity::for_event(&event("compute", 75.0)), AlertSeverity::Critical);
    }

    #[test]
    fn test_alertmanager_alert_format() {
        let alert = AlertmanagerAlert::from_event(&event("storage", 35.0));

        assert_eq!(alert.status, "firing");
        assert_eq!(alert.labels["alertname"], "CloudCostAnomaly");
        assert_eq!(alert.labels["provider"], "azure");
        assert_eq!(alert.labels["service"], "storage");
        assert_eq!(alert.labels["tag_team"], "team-a");
        assert_eq!(alert.annotations["deviation_pct"], "35.00");
        assert!(alert.annotations["description"].contains("35.0% above baseline"));

        let json = serde_json::to_value(&alert).unwrap();
        assert!(json.get("startsAt").is_some());
        assert!(json.get("endsAt").is_none());
    }

    #[tokio::test]
    async fn test_log_sink_deduplicates() {
        let sink = LogSink::new();
        let e = event("compute", 40.0);

        assert!(!sink.should_suppress(&e));
        sink.notify(&e).await.unwrap();
        assert!(sink.should_suppress(&e));

        // Other services are unaffected
        assert!(!sink.should_suppress(&event("database", 40.0)));
    }

    #[tokio::test]
    async fn test_log_sink_zero_window_never_suppresses() {
        let sink = LogSink::new().with_dedup_window(Duration::ZERO);
        let e = event("compute", 40.0);
        sink.notify(&e).await.unwrap();
        assert!(!sink.should_suppress(&e));
    }

    struct CountingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        async fn notify(&self, _event: &AnomalyEvent) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("webhook unreachable")
        }
    }

    #[tokio::test]
    async fn test_notify_detached_swallows_failures() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
        });
        notify_detached(sink.clone(), event("compute", 30.0));

        for _ in 0..50 {
            if sink.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }
}
