//! Pipeline configuration surface
//!
//! Everything the pipeline treats as data: baselines, thresholds, the
//! service → workflow map, per-workflow reduction fractions, policy rules and
//! sizing of the in-process stores. Values are deserialized by the binary
//! (environment and/or file) and must pass [`PipelineConfig::validate`] before
//! any task starts.

use crate::error::{PipelineError, Result};
use crate::models::Provider;
use crate::policy::PolicyRule;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Default anomaly threshold in percent above baseline
pub const DEFAULT_THRESHOLD_PCT: f64 = 20.0;

/// Default fraction of cost removed by a remediation
pub const DEFAULT_REDUCTION_FRACTION: f64 = 0.2;

/// Default maximum observations retained by the metric store
pub const DEFAULT_MAX_OBSERVATIONS: usize = 100_000;

/// Default maximum entries retained by the audit log
pub const DEFAULT_MAX_AUDIT_ENTRIES: usize = 10_000;

/// Workflow used when a service has no category mapping
pub const DEFAULT_WORKFLOW: &str = "default";

/// Expected cost for one (provider, service) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineConfig {
    pub provider: Provider,
    pub service: String,
    pub cost: f64,
}

impl BaselineConfig {
    pub fn new(provider: Provider, service: impl Into<String>, cost: f64) -> Self {
        Self {
            provider,
            service: service.into(),
            cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_baselines")]
    pub baselines: Vec<BaselineConfig>,

    /// Threshold applied when a provider has no override
    #[serde(default = "default_threshold_pct")]
    pub default_threshold_pct: f64,

    #[serde(default)]
    pub provider_thresholds: HashMap<Provider, f64>,

    /// Service category → workflow identifier
    #[serde(default = "default_workflows")]
    pub workflows: HashMap<String, String>,

    /// Workflow identifier → reduction fraction
    #[serde(default = "default_workflow_fractions")]
    pub workflow_fractions: HashMap<String, f64>,

    #[serde(default = "default_reduction_fraction")]
    pub default_fraction: f64,

    /// Ordered first-match policy rules
    #[serde(default = "PolicyRule::default_rules")]
    pub policy_rules: Vec<PolicyRule>,

    /// Bounded bus capacity; unbounded when absent
    #[serde(default)]
    pub bus_capacity: Option<usize>,

    #[serde(default = "default_max_observations")]
    pub max_observations: usize,

    #[serde(default = "default_max_audit_entries")]
    pub max_audit_entries: usize,
}

fn default_threshold_pct() -> f64 {
    DEFAULT_THRESHOLD_PCT
}

fn default_reduction_fraction() -> f64 {
    DEFAULT_REDUCTION_FRACTION
}

fn default_max_observations() -> usize {
    DEFAULT_MAX_OBSERVATIONS
}

fn default_max_audit_entries() -> usize {
    DEFAULT_MAX_AUDIT_ENTRIES
}

fn default_workflows() -> HashMap<String, String> {
    HashMap::from([
        ("compute".to_string(), "compute-optimization".to_string()),
        ("storage".to_string(), "storage-cleanup".to_string()),
    ])
}

fn default_workflow_fractions() -> HashMap<String, f64> {
    HashMap::from([
        ("compute-optimization".to_string(), 0.2),
        ("storage-cleanup".to_string(), 0.3),
    ])
}

/// Baselines for the simulated fleet, roughly the historical alert levels
/// with the default 20% headroom removed.
fn default_baselines() -> Vec<BaselineConfig> {
    let per_provider = [
        (Provider::Aws, 420.0),
        (Provider::Azure, 375.0),
        (Provider::Gcp, 335.0),
    ];

    per_provider
        .iter()
        .flat_map(|(provider, cost)| {
            ["compute", "storage", "database"]
                .iter()
                .map(move |service| BaselineConfig::new(*provider, *service, *cost))
        })
        .collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            baselines: default_baselines(),
            default_threshold_pct: DEFAULT_THRESHOLD_PCT,
            provider_thresholds: HashMap::new(),
            workflows: default_workflows(),
            workflow_fractions: default_workflow_fractions(),
            default_fraction: DEFAULT_REDUCTION_FRACTION,
            policy_rules: PolicyRule::default_rules(),
            bus_capacity: None,
            max_observations: DEFAULT_MAX_OBSERVATIONS,
            max_audit_entries: DEFAULT_MAX_AUDIT_ENTRIES,
        }
    }
}

impl PipelineConfig {
    /// Empty baseline table with every other setting at its default
    pub fn without_baselines() -> Self {
        Self {
            baselines: Vec::new(),
            ..Default::default()
        }
    }

    pub fn with_baseline(mut self, provider: Provider, service: impl Into<String>, cost: f64) -> Self {
        self.baselines.push(BaselineConfig::new(provider, service, cost));
        self
    }

    /// Threshold in percent for a provider
    pub fn threshold_for(&self, provider: Provider) -> f64 {
        self.provider_thresholds
            .get(&provider)
            .copied()
            .unwrap_or(self.default_threshold_pct)
    }

    /// Reject anything the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.baselines.is_empty() {
            return Err(PipelineError::config("no baselines configured"));
        }

        let mut seen = HashSet::new();
        for baseline in &self.baselines {
            if baseline.service.trim().is_empty() {
                return Err(PipelineError::config(format!(
                    "baseline for {} has an empty service name",
                    baseline.provider
                )));
            }
            if !baseline.cost.is_finite() || baseline.cost <= 0.0 {
                return Err(PipelineError::config(format!(
                    "baseline for {}/{} must be positive, got {}",
                    baseline.provider, baseline.service, baseline.cost
                )));
            }
            if !seen.insert((baseline.provider, baseline.service.as_str())) {
                return Err(PipelineError::config(format!(
                    "duplicate baseline for {}/{}",
                    baseline.provider, baseline.service
                )));
            }
        }

        validate_threshold("default", self.default_threshold_pct)?;
        for (provider, threshold) in &self.provider_thresholds {
            validate_threshold(provider.as_str(), *threshold)?;
        }

        validate_fraction(DEFAULT_WORKFLOW, self.default_fraction)?;
        for (workflow, fraction) in &self.workflow_fractions {
            validate_fraction(workflow, *fraction)?;
        }

        if let Some(workflow) = self.workflows.values().find(|w| w.trim().is_empty()) {
            return Err(PipelineError::config(format!(
                "empty workflow identifier: {:?}",
                workflow
            )));
        }

        if self.bus_capacity == Some(0) {
            return Err(PipelineError::config("bus_capacity must be at least 1"));
        }

        if self.max_observations == 0 {
            return Err(PipelineError::config("max_observations must be at least 1"));
        }

        if self.max_audit_entries == 0 {
            return Err(PipelineError::config("max_audit_entries must be at least 1"));
        }

        for rule in &self.policy_rules {
            rule.validate()?;
        }

        Ok(())
    }
}

fn validate_threshold(scope: &str, threshold: f64) -> Result<()> {
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(PipelineError::config(format!(
            "threshold for {} must be positive, got {}",
            scope, threshold
        )));
    }
    Ok(())
}

fn validate_fraction(workflow: &str, fraction: f64) -> Result<()> {
    if !(0.0..1.0).contains(&fraction) {
        return Err(PipelineError::config(format!(
            "reduction fraction for workflow {} must be in [0, 1), got {}",
            workflow, fraction
        )));
    }
    Ok(())
}
