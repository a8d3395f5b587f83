//! Cost anomaly remediation pipeline
//!
//! This crate provides the core functionality for:
//! - Cost metric collection from cloud billing sources
//! - Threshold anomaly detection against configured baselines
//! - Policy-gated automated remediation
//! - Savings reporting and audit of unremediated anomalies
//! - Health checks and observability

pub mod anomaly;
pub mod bus;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod remediation;
pub mod source;
pub mod store;

pub use config::{BaselineConfig, PipelineConfig};
pub use error::{PipelineError, Result};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineHandles, PipelineReport, TickReport};
