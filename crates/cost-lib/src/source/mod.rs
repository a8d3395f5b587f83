//! Cost metric collection
//!
//! This module provides the metric source abstraction, a simulated and a
//! scripted source, and the periodic collection loop that records
//! observations, evaluates them and publishes anomalies.

mod r#loop;
mod simulated;

pub use r#loop::{CollectionConfig, CollectionLoop, CollectionLoopBuilder, CollectionStats, CycleResults};
pub use simulated::{SimulatedSource, StaticSource, DEFAULT_SERVICES};

use crate::error::Result;
use crate::models::CostObservation;

pub use async_trait::async_trait;

/// Trait for cost metric sources
///
/// Implementations report failures as `PipelineError::SourceUnavailable`;
/// the collection loop logs them and retries on the next interval.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Fetch the observations available since the previous poll
    async fn poll(&self) -> Result<Vec<CostObservation>>;
}
