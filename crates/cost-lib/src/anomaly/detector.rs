//! Threshold detection against configured baselines
//!
//! Compares each observation with the expected cost for its
//! (provider, service) pair and emits an [`AnomalyEvent`] when the deviation
//! strictly exceeds the provider's threshold.

use std::collections::HashMap;

use crate::config::{BaselineConfig, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::models::{AnomalyEvent, CostObservation, Provider};

/// Read-only lookup of expected cost per (provider, service)
///
/// Keyed by provider first so a lookup borrows the service name.
#[derive(Debug, Clone, Default)]
pub struct BaselineTable {
    entries: HashMap<Provider, HashMap<String, f64>>,
}

impl BaselineTable {
    /// Build the table, rejecting non-positive or duplicate baselines
    pub fn from_entries(entries: &[BaselineConfig]) -> Result<Self> {
        let mut table: HashMap<Provider, HashMap<String, f64>> = HashMap::new();

        for entry in entries {
            if !entry.cost.is_finite() || entry.cost <= 0.0 {
                return Err(PipelineError::config(format!(
                    "baseline for {}/{} must be positive, got {}",
                    entry.provider, entry.service, entry.cost
                )));
            }
            let by_service = table.entry(entry.provider).or_default();
            if by_service.insert(entry.service.clone(), entry.cost).is_some() {
                return Err(PipelineError::config(format!(
                    "duplicate baseline for {}/{}",
                    entry.provider, entry.service
                )));
            }
        }

        Ok(Self { entries: table })
    }

    pub fn get(&self, provider: Provider, service: &str) -> Option<f64> {
        self.entries.get(&provider)?.get(service).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Percentage by which `observed` exceeds `baseline`
pub fn deviation_pct(observed: f64, baseline: f64) -> f64 {
    (observed - baseline) / baseline * 100.0
}

/// Stateless detector: holds baselines and thresholds, never observation history
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    baselines: BaselineTable,
    default_threshold_pct: f64,
    provider_thresholds: HashMap<Provider, f64>,
}

impl AnomalyDetector {
    pub fn new(baselines: BaselineTable, default_threshold_pct: f64) -> Self {
        Self {
            baselines,
            default_threshold_pct,
            provider_thresholds: HashMap::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let baselines = BaselineTable::from_entries(&config.baselines)?;
        Ok(Self {
            baselines,
            default_threshold_pct: config.default_threshold_pct,
            provider_thresholds: config.provider_thresholds.clone(),
        })
    }

    /// Override the threshold for one provider
    pub fn with_provider_threshold(mut self, provider: Provider, threshold_pct: f64) -> Self {
        self.provider_thresholds.insert(provider, threshold_pct);
        self
    }

    pub fn threshold_for(&self, provider: Provider) -> f64 {
        self.provider_thresholds
            .get(&provider)
            .copied()
            .unwrap_or(self.default_threshold_pct)
    }

    pub fn baselines(&self) -> &BaselineTable {
        &self.baselines
    }

    /// Evaluate one observation
    ///
    /// # Returns
    /// * `Ok(Some(event))` when the deviation is strictly above threshold
    /// * `Ok(None)` otherwise, including a tie at exactly the threshold
    /// * `Err(Configuration)` when no baseline exists for the pair
    pub fn evaluate(&self, obs: &CostObservation) -> Result<Option<AnomalyEvent>> {
        let baseline = self
            .baselines
            .get(obs.provider, &obs.service)
            .ok_or_else(|| {
                PipelineError::config(format!(
                    "no baseline configured for {}/{}",
                    obs.provider, obs.service
                ))
            })?;

        let threshold = self.threshold_for(obs.provider);
        // Compare against the cost limit so an exact tie never rounds into a breach
        let limit = baseline * (1.0 + threshold / 100.0);

        if obs.cost > limit {
            Ok(Some(AnomalyEvent {
                provider: obs.provider,
                service: obs.service.clone(),
                observed_cost: obs.cost,
                baseline_cost: baseline,
                deviation_pct: deviation_pct(obs.cost, baseline),
                threshold_pct: threshold,
                timestamp: obs.timestamp,
                tags: obs.tags.clone(),
            }))
        } else {
            Ok(None)
        }
    }
}
