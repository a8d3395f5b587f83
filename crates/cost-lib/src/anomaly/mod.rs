//! Cost anomaly detection
//!
//! This module provides:
//! - Threshold detection of cost observations against baselines
//! - Notification of anomalies to human-facing sinks

mod detector;
mod notifier;

pub use detector::{deviation_pct, AnomalyDetector, BaselineTable};
pub use notifier::{
    notify_detached, AlertSeverity, AlertmanagerAlert, AlertmanagerPayload, LogSink,
    NotificationSink,
};
